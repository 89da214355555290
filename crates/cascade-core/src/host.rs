//! Local host resolution.
//!
//! The resolved address decides which configured endpoint counts as the
//! co-located collector and is reported as the `hostname` resource label.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// Environment variable that pins the local host address.
pub const HOST_IP_ENV: &str = "CASCADE_HOST_IP";

/// Resolve this process's host address.
///
/// Order: `CASCADE_HOST_IP`, the outbound interface address, `127.0.0.1`.
pub fn resolve_local_host() -> String {
    if let Ok(ip) = std::env::var(HOST_IP_ENV) {
        let ip = ip.trim();
        if !ip.is_empty() {
            debug!(host = %ip, "local host taken from environment");
            return ip.to_string();
        }
    }

    match outbound_ip() {
        Some(ip) => ip.to_string(),
        None => {
            debug!("no outbound interface address, falling back to loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST).to_string()
        }
    }
}

/// Address of the interface the OS would route external traffic through.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() { None } else { Some(ip) }
}
