//! Appliance address parsing: `host`, `host:port` or `bsp://host[:port]`
//!
//! IPv6 literals are taken bare (`::1`) or bracketed (`[::1]:6969`).

use std::net::Ipv6Addr;

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAddr {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for FrameAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse an appliance address, filling in `default_port` when absent.
pub fn parse_frame_addr(s: &str, default_port: u16) -> Option<FrameAddr> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let mut rest = if lower.starts_with("bsp://") {
        &s_trim[6..]
    } else {
        s_trim
    };
    rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return None;
    }
    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (h, tail) = bracketed.split_once(']')?;
        h.parse::<Ipv6Addr>().ok()?;
        let port = match tail {
            "" => default_port,
            _ => tail.strip_prefix(':')?.parse().ok()?,
        };
        (h.to_string(), port)
    } else if rest.parse::<Ipv6Addr>().is_ok() {
        (rest.to_string(), default_port)
    } else {
        match rest.rsplit_once(':') {
            // More than one colon without brackets is neither host:port nor IPv6
            Some((h, _)) if h.contains(':') => return None,
            Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
            None => (rest.to_string(), default_port),
        }
    };
    if host.is_empty() {
        return None;
    }
    Some(FrameAddr { host, port })
}

pub fn parse_default(s: &str) -> Option<FrameAddr> {
    parse_frame_addr(s, DEFAULT_PORT)
}
