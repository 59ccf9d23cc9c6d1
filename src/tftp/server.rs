//! TFTP server implementation.
//!
//! Read-only server for the iPXE binaries. Each transfer runs on its own
//! task with its own socket, which is the transfer ID of RFC 1350.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::packet::{
    self, parse_reply, parse_request, ReadRequest, Reply, Request, ERROR_ACCESS_VIOLATION,
    ERROR_FILE_NOT_FOUND, ERROR_ILLEGAL_OPERATION, ERROR_NOT_DEFINED,
};
use crate::error::TftpError;
use crate::ipxe::BinaryStore;
use crate::net::{bind_udp, check_receive};

const MAX_RETRIES: u32 = 5;
const MAX_REQUEST: usize = 1500;

/// Settings for one TFTP listener.
#[derive(Debug, Clone)]
pub struct TftpSettings {
    pub addr: SocketAddr,
    pub interface: Option<String>,
    /// Retransmission timeout.
    pub timeout: Duration,
    /// Largest block size granted to clients.
    pub max_block_size: usize,
}

/// TFTP server for serving boot files.
#[derive(Debug)]
pub struct TftpServer {
    settings: TftpSettings,
    store: Arc<BinaryStore>,
}

impl TftpServer {
    pub fn new(settings: TftpSettings, store: Arc<BinaryStore>) -> Self {
        Self { settings, store }
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let socket = bind_udp(self.settings.addr, self.settings.interface.as_deref(), false)?;
        info!(
            addr = %self.settings.addr,
            dir = %self.store.dir().display(),
            "TFTP server listening"
        );
        self.serve(socket, shutdown).await
    }

    /// Serve requests arriving on an already bound socket.
    pub async fn serve(self, socket: UdpSocket, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let mut buf = vec![0u8; MAX_REQUEST];

        let failure = loop {
            let (len, peer) = tokio::select! {
                _ = shutdown.cancelled() => break None,
                received = socket.recv_from(&mut buf) => match check_receive(received, "tftp") {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(e) => break Some(e),
                },
            };

            match parse_request(&buf[..len]) {
                Ok(Request::Read(request)) => {
                    let store = self.store.clone();
                    let settings = self.settings.clone();
                    let local = socket.local_addr()?;
                    tracker.spawn(async move {
                        let filename = request.filename.clone();
                        if let Err(e) = transfer(&store, &settings, local, request, peer).await {
                            warn!(peer = %peer, file = %filename, error = %e, "TFTP transfer failed");
                        }
                    });
                }
                Ok(Request::Write { filename }) => {
                    warn!(peer = %peer, file = %filename, "TFTP write request denied");
                    let reply = packet::error_packet(ERROR_ACCESS_VIOLATION, "Write not supported");
                    send_error_reply(&socket, &reply, peer).await;
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "dropping TFTP request");
                    let reply = packet::error_packet(ERROR_ILLEGAL_OPERATION, &e.to_string());
                    send_error_reply(&socket, &reply, peer).await;
                }
            }
        };

        tracker.close();
        tracker.wait().await;
        match failure {
            Some(e) => Err(anyhow::Error::new(e).context("TFTP receive failed")),
            None => {
                info!("TFTP server stopped");
                Ok(())
            }
        }
    }
}

/// Answer a rejected request. The client retries or gives up on its own, so
/// a failed send is only logged.
async fn send_error_reply(socket: &UdpSocket, reply: &[u8], peer: SocketAddr) {
    if let Err(e) = socket.send_to(reply, peer).await {
        debug!(peer = %peer, error = %e, "failed to send TFTP error reply");
    }
}

/// Run one read transfer from a fresh socket connected to the client.
async fn transfer(
    store: &BinaryStore,
    settings: &TftpSettings,
    local: SocketAddr,
    request: ReadRequest,
    peer: SocketAddr,
) -> Result<(), TftpError> {
    let socket = UdpSocket::bind(SocketAddr::new(local.ip(), 0)).await?;
    socket.connect(peer).await?;

    let data = match store.read(&request.filename).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            info!(peer = %peer, file = %request.filename, "TFTP file not found");
            socket
                .send(&packet::error_packet(ERROR_FILE_NOT_FOUND, "File not found"))
                .await?;
            return Ok(());
        }
        Err(e) => {
            socket
                .send(&packet::error_packet(ERROR_NOT_DEFINED, "File unavailable"))
                .await?;
            return Err(e.into());
        }
    };

    let negotiated = request.negotiate(data.len() as u64, settings.max_block_size, settings.timeout);
    info!(
        peer = %peer,
        file = %request.filename,
        bytes = data.len(),
        block_size = negotiated.block_size,
        "TFTP transfer started"
    );

    if !negotiated.acknowledged.is_empty() {
        let oack = packet::oack_packet(&negotiated.acknowledged);
        send_until_acked(&socket, &oack, 0, negotiated.timeout).await?;
    }

    // A final short (possibly empty) block ends the transfer.
    let mut block: u16 = 1;
    let mut offset = 0;
    loop {
        let end = (offset + negotiated.block_size).min(data.len());
        let chunk = &data[offset..end];
        send_until_acked(&socket, &packet::data_packet(block, chunk), block, negotiated.timeout)
            .await?;

        if chunk.len() < negotiated.block_size {
            break;
        }
        offset = end;
        block = block.wrapping_add(1);
    }

    info!(peer = %peer, file = %request.filename, bytes = data.len(), "TFTP transfer complete");
    Ok(())
}

/// Send `packet` and wait for the ACK of `block`, retransmitting on timeout.
/// Stale ACKs are ignored.
async fn send_until_acked(
    socket: &UdpSocket,
    packet: &[u8],
    block: u16,
    timeout: Duration,
) -> Result<(), TftpError> {
    let mut buf = [0u8; 516];

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            debug!(block, attempt, "TFTP retransmit");
        }
        socket.send(packet).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let len = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            match parse_reply(&buf[..len]) {
                Reply::Ack(acked) if acked == block => return Ok(()),
                Reply::Ack(_) | Reply::Other => continue,
                Reply::Error { code, message } => {
                    return Err(TftpError::Client { code, message });
                }
            }
        }
    }

    Err(TftpError::Timeout(block))
}
