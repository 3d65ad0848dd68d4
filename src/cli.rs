//! Shared CLI helpers and small reusable Clap fragments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Options accepted by every framectl command
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "DigiFrame client - discover, list, send and delete photos")]
pub struct FrameOpts {
    /// Appliance address (host[:port] or bsp://host:port); saved address or discovery when omitted
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Config file (defaults to ~/.config/digiframe/framectl.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append protocol events to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Print connection progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: FrameCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum FrameCommand {
    /// Broadcast a discovery probe and remember the reply
    Discover {
        /// Reply deadline in milliseconds (config value when omitted)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List image IDs stored on the frame
    List,
    /// Send an image file to the frame
    Send {
        file: PathBuf,
    },
    /// Delete an image from the frame (no confirmation is returned)
    Delete {
        id: String,
    },
}

impl FrameCommand {
    pub fn name(&self) -> &'static str {
        match self {
            FrameCommand::Discover { .. } => "discover",
            FrameCommand::List => "list",
            FrameCommand::Send { .. } => "send",
            FrameCommand::Delete { .. } => "delete",
        }
    }
}
