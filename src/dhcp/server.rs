//! DHCP listener.
//!
//! Receives on the DHCP server port and, in the proxy modes, on the PXE
//! boot server port (4011). Every datagram is handled on its own task.

use std::future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::codes;
use super::handler::Handler;
use super::parser::DhcpParser;
use crate::config::OperatingMode;
use crate::domain::BootRequest;
use crate::net::{bind_udp, check_receive};

const MAX_DATAGRAM: usize = 1500;

#[derive(Debug)]
pub struct DhcpServer {
    addr: SocketAddrV4,
    interface: Option<String>,
    handler: Arc<Handler>,
}

impl DhcpServer {
    pub fn new(addr: SocketAddrV4, interface: Option<String>, handler: Arc<Handler>) -> Self {
        Self {
            addr,
            interface,
            handler,
        }
    }

    /// Serve until `shutdown` is cancelled, then wait for in-flight replies.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let iface = self.interface.as_deref();
        let main = Arc::new(bind_udp(SocketAddr::V4(self.addr), iface, true)?);

        let proxy = match self.handler.mode() {
            OperatingMode::Proxy | OperatingMode::AutoProxy => {
                let addr = SocketAddrV4::new(*self.addr.ip(), codes::PROXY_PORT);
                Some(Arc::new(bind_udp(SocketAddr::V4(addr), iface, true)?))
            }
            OperatingMode::Reservation => None,
        };

        info!(
            addr = %self.addr,
            proxy_port = proxy.is_some(),
            mode = %self.handler.mode(),
            "DHCP server listening"
        );

        let tracker = TaskTracker::new();
        let mut main_buf = vec![0u8; MAX_DATAGRAM];
        let mut proxy_buf = vec![0u8; MAX_DATAGRAM];

        let failure = loop {
            let dispatched = tokio::select! {
                _ = shutdown.cancelled() => break None,
                received = main.recv_from(&mut main_buf) => {
                    self.dispatch(&tracker, &main, &main_buf, received, self.addr.port())
                }
                received = recv_optional(proxy.as_deref(), &mut proxy_buf) => match &proxy {
                    Some(socket) => {
                        self.dispatch(&tracker, socket, &proxy_buf, received, codes::PROXY_PORT)
                    }
                    None => Ok(()),
                },
            };
            if let Err(e) = dispatched {
                break Some(e);
            }
        };

        tracker.close();
        tracker.wait().await;
        match failure {
            Some(e) => Err(anyhow::Error::new(e).context("DHCP receive failed")),
            None => {
                info!("DHCP server stopped");
                Ok(())
            }
        }
    }

    /// Hand one received datagram to its own task. Errors only for receive
    /// failures the listener cannot continue after.
    fn dispatch(
        &self,
        tracker: &TaskTracker,
        socket: &Arc<UdpSocket>,
        buf: &[u8],
        received: io::Result<(usize, SocketAddr)>,
        local_port: u16,
    ) -> io::Result<()> {
        let Some((len, peer)) = check_receive(received, "dhcp")? else {
            return Ok(());
        };

        let data = buf[..len].to_vec();
        let socket = socket.clone();
        let handler = self.handler.clone();
        tracker.spawn(async move {
            handle_datagram(&handler, &socket, &data, peer, local_port).await;
        });
        Ok(())
    }
}

async fn recv_optional(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => future::pending().await,
    }
}

/// Parse, handle and answer one datagram. Failures are logged and dropped.
pub async fn handle_datagram(
    handler: &Handler,
    socket: &UdpSocket,
    data: &[u8],
    peer: SocketAddr,
    local_port: u16,
) {
    let packet = match DhcpParser::new().parse(data) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(peer = %peer, error = %e, "dropping malformed DHCP packet");
            return;
        }
    };

    let Some(request) = BootRequest::from_packet(packet, peer, local_port) else {
        debug!(peer = %peer, "dropping non-request DHCP packet");
        return;
    };

    let reply = match handler.handle(&request).await {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "not replying");
            return;
        }
    };

    if let Err(e) = socket.send_to(&reply.encode(), reply.destination).await {
        warn!(destination = %reply.destination, error = %e, "failed to send DHCP reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crate::backend::tests::FakeBackend;
    use crate::dhcp::options::tests::test_config;
    use crate::dhcp::parser::tests::raw_request;
    use crate::domain::DhcpMessageType;

    fn proxy_handler() -> Handler {
        Handler::new(
            OperatingMode::AutoProxy,
            Arc::new(FakeBackend::default()),
            Ipv4Addr::new(127, 0, 0, 1),
            None,
            test_config(),
            Duration::from_secs(1),
        )
    }

    fn pxe_request_bytes() -> Vec<u8> {
        let mut uuid = vec![0u8];
        uuid.extend_from_slice(&[0x11; 16]);
        raw_request(&[
            (codes::MESSAGE_TYPE, &[1]),
            (codes::VENDOR_CLASS_ID, b"PXEClient:Arch:00007:UNDI:003016"),
            (codes::CLIENT_ARCH, &[0, 7]),
            (codes::CLIENT_NDI, &[1, 3, 16]),
            (codes::CLIENT_UUID, &uuid),
        ])
    }

    #[tokio::test]
    async fn test_proxy_port_request_is_answered_unicast() {
        let server = bind_udp("127.0.0.1:0".parse().unwrap(), None, true).unwrap();
        let client = bind_udp("127.0.0.1:0".parse().unwrap(), None, false).unwrap();
        let peer = client.local_addr().unwrap();

        handle_datagram(
            &proxy_handler(),
            &server,
            &pxe_request_bytes(),
            peer,
            codes::PROXY_PORT,
        )
        .await;

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let mut reply = buf[..len].to_vec();
        assert_eq!(reply[0], 2);
        reply[0] = 1;
        let parsed = DhcpParser::new().parse(&reply).unwrap();
        assert_eq!(parsed.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(parsed.file.as_deref(), Some("ipxe.efi"));
        assert_eq!(parsed.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(parsed.client_uuid().map(<[u8]>::len), Some(17));
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let server = bind_udp("127.0.0.1:0".parse().unwrap(), None, true).unwrap();
        let client = bind_udp("127.0.0.1:0".parse().unwrap(), None, false).unwrap();
        let peer = client.local_addr().unwrap();

        handle_datagram(&proxy_handler(), &server, &[1, 2, 3], peer, codes::PROXY_PORT).await;

        let mut buf = [0u8; 16];
        let received =
            tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let handler = Arc::new(Handler::new(
            OperatingMode::Reservation,
            Arc::new(FakeBackend::default()),
            Ipv4Addr::new(127, 0, 0, 1),
            None,
            test_config(),
            Duration::from_secs(1),
        ));
        let server = DhcpServer::new("127.0.0.1:0".parse().unwrap(), None, handler);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fatal_receive_error_stops_dispatch() {
        let socket = Arc::new(bind_udp("127.0.0.1:0".parse().unwrap(), None, true).unwrap());
        let server = DhcpServer::new(
            "127.0.0.1:0".parse().unwrap(),
            None,
            Arc::new(proxy_handler()),
        );
        let tracker = TaskTracker::new();
        let buf = [0u8; 4];

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(server.dispatch(&tracker, &socket, &buf, Err(reset), 67).is_ok());

        let gone = io::Error::from(io::ErrorKind::NotConnected);
        let err = server.dispatch(&tracker, &socket, &buf, Err(gone), 67).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(tracker.is_empty());
    }
}
