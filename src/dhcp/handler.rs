//! Mode dispatcher: turns a classified request into a reply or nothing.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::codes;
use super::options::NetbootConfig;
use super::reply::{domain_search_list, ipv4_list, Reply};
use crate::backend::{lookup_with_timeout, BootRecordLookup};
use crate::config::OperatingMode;
use crate::domain::{BootRecord, BootRequest, ClientArch, ClientType};
use crate::error::LookupError;
use crate::urls::format_mac;

/// Per-request failures. The listener logs these and sends nothing.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("record lookup for {mac} failed: {source}")]
    Lookup {
        mac: String,
        #[source]
        source: LookupError,
    },
}

/// Why a request was not treated as a netboot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    MessageType,
    VendorClass,
    MissingArch,
    MissingNdi,
    MalformedMachineId,
}

/// Check the netboot signature: DISCOVER or REQUEST, a PXE or HTTP vendor
/// class, options 93 and 94 present, and option 97 (if sent) 17 bytes with
/// a zero type byte.
pub fn classify(request: &BootRequest) -> Result<ClientType, Ignored> {
    if request.message_type.reply_type().is_none() {
        return Err(Ignored::MessageType);
    }
    let client_type = request
        .vendor_class
        .as_deref()
        .and_then(ClientType::from_vendor_class)
        .ok_or(Ignored::VendorClass)?;
    if request.arch.is_none() {
        return Err(Ignored::MissingArch);
    }
    if request.client_ndi.is_none() {
        return Err(Ignored::MissingNdi);
    }
    if let Some(id) = &request.machine_id {
        if id.len() != 17 || id[0] != 0 {
            return Err(Ignored::MalformedMachineId);
        }
    }
    Ok(client_type)
}

#[derive(Debug)]
pub struct Handler {
    mode: OperatingMode,
    backend: Arc<dyn BootRecordLookup>,
    /// Address written into option 54.
    server_ip: Ipv4Addr,
    syslog_ip: Option<Ipv4Addr>,
    netboot: NetbootConfig,
    lookup_timeout: Duration,
}

impl Handler {
    pub fn new(
        mode: OperatingMode,
        backend: Arc<dyn BootRecordLookup>,
        server_ip: Ipv4Addr,
        syslog_ip: Option<Ipv4Addr>,
        netboot: NetbootConfig,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            backend,
            server_ip,
            syslog_ip,
            netboot,
            lookup_timeout,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Answer one request. `Ok(None)` means no reply is sent.
    pub async fn handle(&self, request: &BootRequest) -> Result<Option<Reply>, HandlerError> {
        let mac = format_mac(&request.mac);
        if let Err(reason) = classify(request) {
            debug!(mac = %mac, message_type = %request.message_type, ?reason, "ignoring non-netboot request");
            return Ok(None);
        }
        // classify guarantees a reply type
        let Some(reply_type) = request.message_type.reply_type() else {
            return Ok(None);
        };

        let record = match self.mode {
            OperatingMode::AutoProxy => None,
            OperatingMode::Reservation | OperatingMode::Proxy => {
                match self.lookup(request).await? {
                    Some(record) => Some(record),
                    None => return Ok(None),
                }
            }
        };

        let vlan_id = match self.mode {
            OperatingMode::Reservation => record.as_ref().and_then(|r| r.dhcp.vlan_id.as_deref()),
            OperatingMode::Proxy | OperatingMode::AutoProxy => None,
        };

        let Some(netboot) = self.netboot.build(request, vlan_id) else {
            let arch = request.arch.map(ClientArch::from_u16);
            info!(mac = %mac, arch = ?arch, "unsupported client architecture, not replying");
            return Ok(None);
        };

        let mut reply = Reply::to_request(request, reply_type);
        reply.set_option(codes::SERVER_ID, self.server_ip.octets());

        if let (OperatingMode::Reservation, Some(record)) = (self.mode, &record) {
            let Some(ip) = record.dhcp.ip_address else {
                info!(mac = %mac, "record has no allocated address, not replying");
                return Ok(None);
            };
            reply.yiaddr = ip;
            self.apply_lease(&mut reply, record);
        }

        netboot.apply(&mut reply);

        info!(
            mac = %mac,
            mode = %self.mode,
            reply = %reply.message_type,
            boot_file = %netboot.boot_file,
            next_server = %netboot.next_server,
            destination = %reply.destination,
            "built netboot reply"
        );
        Ok(Some(reply))
    }

    /// Resolve the record; not found or not boot-enabled is `None`.
    async fn lookup(&self, request: &BootRequest) -> Result<Option<BootRecord>, HandlerError> {
        let record = lookup_with_timeout(self.backend.as_ref(), request.mac, self.lookup_timeout)
            .await
            .map_err(|source| HandlerError::Lookup {
                mac: format_mac(&request.mac),
                source,
            })?;

        match record {
            None => {
                debug!(mac = %format_mac(&request.mac), backend = self.backend.name(), "no record found");
                Ok(None)
            }
            Some(record) if !record.allows_netboot() => {
                debug!(mac = %format_mac(&request.mac), "record does not allow netboot");
                Ok(None)
            }
            Some(record) => Ok(Some(record)),
        }
    }

    fn apply_lease(&self, reply: &mut Reply, record: &BootRecord) {
        let dhcp = &record.dhcp;
        if let Some(mask) = dhcp.subnet_mask {
            reply.set_option(codes::SUBNET_MASK, mask.octets());
        }
        if let Some(gateway) = dhcp.default_gateway {
            reply.set_option(codes::ROUTER, gateway.octets());
        }
        if !dhcp.name_servers.is_empty() {
            reply.set_option(codes::DNS_SERVERS, ipv4_list(&dhcp.name_servers));
        }
        if let Some(syslog) = self.syslog_ip {
            reply.set_option(codes::LOG_SERVER, syslog.octets());
        }
        if let Some(hostname) = dhcp.hostname.as_deref().filter(|h| !h.is_empty()) {
            reply.set_option(codes::HOSTNAME, hostname.as_bytes());
        }
        if let Some(domain) = dhcp.domain_name.as_deref().filter(|d| !d.is_empty()) {
            reply.set_option(codes::DOMAIN_NAME, domain.as_bytes());
        }
        if let Some(broadcast) = dhcp.broadcast_address {
            reply.set_option(codes::BROADCAST_ADDRESS, broadcast.octets());
        }
        if !dhcp.ntp_servers.is_empty() {
            reply.set_option(codes::NTP_SERVERS, ipv4_list(&dhcp.ntp_servers));
        }
        reply.set_option(codes::LEASE_TIME, record.lease_time().to_be_bytes());
        if !dhcp.domain_search.is_empty() {
            reply.set_option(codes::DOMAIN_SEARCH, domain_search_list(&dhcp.domain_search));
        }
    }
}
