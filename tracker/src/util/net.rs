//! Local network address discovery.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

/// The address this host uses for outbound traffic, e.g. `192.168.1.15`.
///
/// Connecting a UDP socket selects a route without sending anything. Falls
/// back to loopback when there is no route.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    probe().unwrap_or_else(|e| {
        debug!(error = %e, "local_ip_probe_failed");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}
