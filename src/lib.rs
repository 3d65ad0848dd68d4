//! DigiFrame client library
//!
//! BSP framing, TCP transport and protocol session for the digital photo
//! frame, plus UDP discovery and a session-lifetime image cache.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod protocol_core;
pub mod session;
pub mod transport;
pub mod url;
