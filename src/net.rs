//! UDP socket setup shared by the DHCP, TFTP and syslog listeners.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::warn;

/// Bind a non-blocking UDP socket with `SO_REUSEADDR`, optionally allowing
/// broadcast and pinning it to one interface.
pub fn bind_udp(addr: SocketAddr, interface: Option<&str>, broadcast: bool) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create socket")?;

    socket.set_reuse_address(true)?;
    if broadcast {
        socket.set_broadcast(true)?;
    }
    if let Some(interface) = interface.filter(|i| !i.is_empty()) {
        bind_device(&socket, interface)?;
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind to {addr}"))?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("Failed to register socket with tokio")
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &Socket, interface: &str) -> Result<()> {
    socket
        .bind_device(Some(interface.as_bytes()))
        .with_context(|| format!("Failed to bind to interface {interface}"))
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &Socket, interface: &str) -> Result<()> {
    anyhow::bail!("binding to interface {interface} is only supported on Linux")
}

/// Receive errors a listener survives. ICMP errors caused by earlier sends
/// show up on the next receive as resets or refusals.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

/// `Ok(None)` for a transient receive error, which is logged, and `Err` for
/// one that should stop the listener.
pub fn check_receive<T>(received: io::Result<T>, listener: &str) -> io::Result<Option<T>> {
    match received {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_transient(&e) => {
            warn!(listener, error = %e, "receive failed, continuing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// IPv4 address of the interface holding the default route. Connecting a UDP
/// socket only selects a route; nothing is sent.
pub fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}
