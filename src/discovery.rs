//! SSDP-style appliance discovery.
//!
//! Broadcast a fixed probe on the local subnet and take the first reply
//! datagram as the appliance's address. No retries; first reply or timeout
//! wins.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

use crate::error::{BspError, Result};
use crate::protocol::discovery::{FALLBACK_BROADCAST, MAX_REPLY_LEN, PORT, PROBE};
use crate::protocol::timeouts::DISCOVERY_MS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub timeout_ms: u64,
    /// Interface to broadcast on; first usable one when unset.
    pub interface: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: PORT,
            timeout_ms: DISCOVERY_MS,
            interface: None,
        }
    }
}

/// An IPv4 address bound to a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
    pub up: bool,
    pub loopback: bool,
}

impl Interface {
    /// Subnet broadcast address, or the limited broadcast when the mask is
    /// unknown.
    pub fn broadcast(&self) -> Ipv4Addr {
        match self.netmask {
            Some(mask) => broadcast_address(self.ip, mask),
            None => FALLBACK_BROADCAST,
        }
    }
}

/// `ip | !mask`
pub fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

/// Pick the interface to broadcast on: the named one if requested, otherwise
/// the first that is up and not loopback.
pub fn select_interface<'a>(ifaces: &'a [Interface], preferred: Option<&str>) -> Option<&'a Interface> {
    match preferred {
        Some(name) => ifaces.iter().find(|i| i.name == name),
        None => ifaces.iter().find(|i| i.up && !i.loopback),
    }
}

#[cfg(unix)]
pub fn local_interfaces() -> Vec<Interface> {
    use std::ffi::CStr;

    unsafe fn to_ipv4(sa: *const libc::sockaddr) -> Ipv4Addr {
        let sin = &*(sa as *const libc::sockaddr_in);
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))
    }

    let mut out = Vec::new();
    let mut ifaddr: *mut libc::ifaddrs = std::ptr::null_mut();
    unsafe {
        if libc::getifaddrs(&mut ifaddr) != 0 {
            return out;
        }
        let mut cur = ifaddr;
        while !cur.is_null() {
            let ifa = &*cur;
            cur = ifa.ifa_next;
            if ifa.ifa_addr.is_null() || i32::from((*ifa.ifa_addr).sa_family) != libc::AF_INET {
                continue;
            }
            let netmask = if ifa.ifa_netmask.is_null() {
                None
            } else {
                Some(to_ipv4(ifa.ifa_netmask))
            };
            let flags = ifa.ifa_flags;
            out.push(Interface {
                name: CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned(),
                ip: to_ipv4(ifa.ifa_addr),
                netmask,
                up: flags & (libc::IFF_UP as libc::c_uint) != 0,
                loopback: flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0,
            });
        }
        libc::freeifaddrs(ifaddr);
    }
    out
}

// No interface enumeration off unix; discovery reports NotFound there.
#[cfg(not(unix))]
pub fn local_interfaces() -> Vec<Interface> {
    Vec::new()
}

/// Find the appliance on the local subnet.
pub async fn discover(cfg: &DiscoveryConfig) -> Result<String> {
    let ifaces = local_interfaces();
    let iface = select_interface(&ifaces, cfg.interface.as_deref()).ok_or_else(|| {
        BspError::NotFound(match &cfg.interface {
            Some(name) => format!("no IPv4 address on interface {}", name),
            None => "no local IPv4 interface".to_string(),
        })
    })?;
    let target = SocketAddr::V4(SocketAddrV4::new(iface.broadcast(), cfg.port));
    probe(target, cfg.timeout_ms).await
}

/// Send the probe to `target` and wait up to `timeout_ms` for one reply.
pub async fn probe(target: SocketAddr, timeout_ms: u64) -> Result<String> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| BspError::NotFound(format!("bind: {}", e)))?;
    socket
        .set_broadcast(true)
        .map_err(|e| BspError::NotFound(format!("enable broadcast: {}", e)))?;
    socket
        .send_to(PROBE.as_bytes(), target)
        .await
        .map_err(|e| BspError::NotFound(format!("send to {}: {}", target, e)))?;

    // One spare byte so an oversized reply shows up instead of being cut short
    let mut buf = [0u8; MAX_REPLY_LEN + 1];
    match timeout(Duration::from_millis(timeout_ms), socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _from))) => parse_reply(&buf[..n]),
        Ok(Err(e)) => Err(BspError::NotFound(format!("receive: {}", e))),
        Err(_) => Err(BspError::NotFound(format!(
            "no reply within {} ms",
            timeout_ms
        ))),
    }
}

/// The reply payload is the appliance's address as UTF-8 text.
pub fn parse_reply(datagram: &[u8]) -> Result<String> {
    if datagram.len() > MAX_REPLY_LEN {
        return Err(BspError::NotFound(format!(
            "reply longer than {} bytes",
            MAX_REPLY_LEN
        )));
    }
    let text = std::str::from_utf8(datagram)
        .map_err(|_| BspError::NotFound("reply is not UTF-8".to_string()))?;
    let addr = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if addr.is_empty() {
        return Err(BspError::NotFound("empty reply".to_string()));
    }
    Ok(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, ip: [u8; 4], mask: Option<[u8; 4]>, up: bool, loopback: bool) -> Interface {
        Interface {
            name: name.to_string(),
            ip: Ipv4Addr::from(ip),
            netmask: mask.map(Ipv4Addr::from),
            up,
            loopback,
        }
    }

    #[test]
    fn test_broadcast_address() {
        assert_eq!(
            broadcast_address(Ipv4Addr::new(192, 168, 1, 13), Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
        assert_eq!(
            broadcast_address(Ipv4Addr::new(10, 1, 2, 3), Ipv4Addr::new(255, 255, 0, 0)),
            Ipv4Addr::new(10, 1, 255, 255)
        );
        assert_eq!(
            broadcast_address(Ipv4Addr::new(172, 16, 5, 77), Ipv4Addr::new(255, 255, 255, 192)),
            Ipv4Addr::new(172, 16, 5, 127)
        );
    }

    #[test]
    fn test_missing_mask_uses_limited_broadcast() {
        let i = iface("en0", [192, 168, 1, 13], None, true, false);
        assert_eq!(i.broadcast(), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_select_interface() {
        let ifaces = vec![
            iface("lo", [127, 0, 0, 1], Some([255, 0, 0, 0]), true, true),
            iface("eth0", [10, 0, 0, 2], Some([255, 255, 255, 0]), false, false),
            iface("wlan0", [192, 168, 1, 13], Some([255, 255, 255, 0]), true, false),
        ];
        assert_eq!(select_interface(&ifaces, None).unwrap().name, "wlan0");
        assert_eq!(select_interface(&ifaces, Some("eth0")).unwrap().name, "eth0");
        assert!(select_interface(&ifaces, Some("en0")).is_none());
        assert!(select_interface(&ifaces[..1], None).is_none());
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(b"10.0.0.5").unwrap(), "10.0.0.5");
        assert_eq!(parse_reply(b"10.0.0.5\n\0\0").unwrap(), "10.0.0.5");
        assert!(matches!(parse_reply(b""), Err(BspError::NotFound(_))));
        assert!(matches!(parse_reply(&[0xFF, 0xFE]), Err(BspError::NotFound(_))));
        assert!(parse_reply(&[b'1'; MAX_REPLY_LEN]).is_ok());
        assert!(matches!(
            parse_reply(&[b'1'; MAX_REPLY_LEN + 1]),
            Err(BspError::NotFound(_))
        ));
    }

    #[test]
    fn test_local_interfaces_are_ipv4() {
        // Smoke test: enumeration must not panic and must report IPv4 only
        for i in local_interfaces() {
            assert!(!i.name.is_empty());
            let _ = i.broadcast();
        }
    }

    #[tokio::test]
    async fn test_probe_with_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (n, from) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], PROBE.as_bytes());
            responder.send_to(b"10.0.0.5", from).await.unwrap();
        });

        assert_eq!(probe(target, 2000).await.unwrap(), "10.0.0.5");
    }

    #[tokio::test]
    async fn test_oversized_reply_is_not_found() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            let mut reply = b"10.0.0.5".to_vec();
            reply.resize(MAX_REPLY_LEN + 100, b' ');
            reply.extend_from_slice(b"junk");
            responder.send_to(&reply, from).await.unwrap();
        });

        assert!(matches!(probe(target, 2000).await, Err(BspError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_probe_without_responder_times_out() {
        // Bound but silent
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = silent.local_addr().unwrap();

        let started = std::time::Instant::now();
        let res = probe(target, 200).await;
        assert!(matches!(res, Err(BspError::NotFound(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_discover_unknown_interface() {
        let cfg = DiscoveryConfig {
            interface: Some("no-such-iface0".to_string()),
            ..DiscoveryConfig::default()
        };
        assert!(matches!(discover(&cfg).await, Err(BspError::NotFound(_))));
    }
}
