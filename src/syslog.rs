//! Syslog receiver.
//!
//! Installer environments log to us over UDP. Each datagram is re-emitted
//! as a tracing event so it ends up next to the rest of the boot logs.

use std::io;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::net::{bind_udp, check_receive};

const MAX_MESSAGE: usize = 8192;

const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron",
    "authpriv", "ftp", "ntp", "security", "console", "solaris-cron", "local0", "local1", "local2",
    "local3", "local4", "local5", "local6", "local7",
];

const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// One received syslog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: &'static str,
    pub severity: &'static str,
    pub message: String,
}

impl SyslogMessage {
    /// Split a `<PRI>` prefix off a raw datagram. Messages without a valid
    /// prefix are kept as `user.notice`, the RFC 3164 default.
    pub fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_end_matches(['\n', '\r', '\0']);

        let parsed = text.strip_prefix('<').and_then(|rest| {
            let (pri, body) = rest.split_once('>')?;
            if pri.is_empty() || pri.len() > 3 || !pri.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let pri: usize = pri.parse().ok()?;
            let facility = *FACILITIES.get(pri / 8)?;
            Some((facility, SEVERITIES[pri % 8], body))
        });

        let (facility, severity, body) = parsed.unwrap_or(("user", "notice", text));
        Self {
            facility,
            severity,
            message: body.trim_start().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SyslogServer {
    addr: SocketAddr,
    interface: Option<String>,
}

impl SyslogServer {
    pub fn new(addr: SocketAddr, interface: Option<String>) -> Self {
        Self { addr, interface }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let socket = bind_udp(self.addr, self.interface.as_deref(), false)?;
        info!(addr = %self.addr, "syslog receiver listening");
        serve(socket, shutdown)
            .await
            .context("syslog receive failed")?;
        info!("syslog receiver stopped");
        Ok(())
    }
}

async fn serve(socket: UdpSocket, shutdown: CancellationToken) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_MESSAGE];
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            received = socket.recv_from(&mut buf) => received,
        };
        let Some((len, peer)) = check_receive(received, "syslog")? else {
            continue;
        };
        let msg = SyslogMessage::parse(&buf[..len]);
        info!(
            target: "syslog",
            host = %peer.ip(),
            facility = msg.facility,
            severity = msg.severity,
            msg = %msg.message,
            "syslog message"
        );
    }
}
