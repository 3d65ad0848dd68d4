//! Shared protocol constants for the BSP framed transport

use serde::{Deserialize, Serialize};

// Default appliance TCP port
pub const DEFAULT_PORT: u16 = 6969;

// Header length prefix: fixed width, zero-padded ASCII decimal
pub const HEADER_PREFIX_LEN: usize = 3;

// Largest header the 3-digit prefix can describe
pub const MAX_HEADER_LEN: usize = 999;

// Maximum body size (64MB) - prevents memory exhaustion from a bogus Content-Length
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

// Read size used when draining a body we refuse to keep
pub const DISCARD_CHUNK: usize = 64 * 1024;

// Header keys
pub mod keys {
    pub const REQUEST_TYPE: &str = "Request-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const IMAGE_ID: &str = "ImageID";
}

// Discovery (SSDP-style UDP broadcast)
pub mod discovery {
    pub const PORT: u16 = 37020;
    pub const PROBE: &str = "BSP: Requesting IP address of Digital Photo Frame";
    // Largest reply datagram we accept; an IPv4 dotted quad needs 15
    pub const MAX_REPLY_LEN: usize = 512;
    pub const FALLBACK_BROADCAST: std::net::Ipv4Addr = std::net::Ipv4Addr::BROADCAST;
}

// Application-level deadlines, independent of any transport-level timeouts
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5000;

    // Discovery reply timeout (ms)
    pub const DISCOVERY_MS: u64 = 5000;
}

/// The three request kinds a client can issue.
///
/// Each maps to exactly one `Request-Type` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "Transfer-Image")]
    Transfer,
    #[serde(rename = "Request-Image")]
    RequestAll,
    #[serde(rename = "Delete-Image")]
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Transfer => "Transfer-Image",
            RequestType::RequestAll => "Request-Image",
            RequestType::Delete => "Delete-Image",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&RequestType::Transfer).unwrap(),
            "\"Transfer-Image\""
        );
        assert_eq!(
            serde_json::to_string(&RequestType::RequestAll).unwrap(),
            "\"Request-Image\""
        );
        assert_eq!(
            serde_json::to_string(&RequestType::Delete).unwrap(),
            "\"Delete-Image\""
        );
    }

    #[test]
    fn test_request_type_display_matches_serde() {
        for t in [RequestType::Transfer, RequestType::RequestAll, RequestType::Delete] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json.trim_matches('"'), t.to_string());
        }
    }

    #[test]
    fn test_unknown_request_type_rejected() {
        assert!(serde_json::from_str::<RequestType>("\"Resize-Image\"").is_err());
    }
}
