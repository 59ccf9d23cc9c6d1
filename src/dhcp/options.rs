//! Netboot option builder: next-server, boot filename and PXE vendor options.

use std::net::{Ipv4Addr, SocketAddrV4};

use tracing::warn;
use url::{Host, Url};

use super::codes;
use super::reply::Reply;
use crate::domain::{BootRequest, ClientArch, ClientType, IPXE_USER_CLASS};
use crate::urls::{authority, ScriptUrl};

/// PXE discovery control: skip boot server discovery, use the boot file.
const PXE_DISCOVERY_CONTROL: [u8; 3] = [6, 1, 8];

/// PXE vendor sub-option carrying the VLAN id.
const PXE_VLAN_SUBOPTION: u8 = 116;

const MAX_VLAN_ID: u16 = 4095;

/// Static server addresses the boot options point at.
#[derive(Debug, Clone)]
pub struct NetbootConfig {
    pub tftp_addr: SocketAddrV4,
    /// Directory URL iPXE binaries are served from over HTTP.
    pub http_binary_url: Url,
    pub script_url: ScriptUrl,
    /// User class of iPXE builds whose embedded script chains to us.
    pub custom_user_class: String,
}

/// Boot-related reply fields for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetbootOptions {
    pub next_server: Ipv4Addr,
    pub boot_file: String,
    pub client_type: ClientType,
    pub vendor_options: Vec<u8>,
    pub machine_id: Option<Vec<u8>>,
}

impl NetbootOptions {
    pub fn apply(&self, reply: &mut Reply) {
        reply.siaddr = self.next_server;
        reply.file = Some(self.boot_file.clone());
        reply.set_option(codes::VENDOR_CLASS_ID, self.client_type.as_str().as_bytes());
        reply.set_option(codes::VENDOR_SPECIFIC, self.vendor_options.clone());
        if let Some(id) = &self.machine_id {
            reply.set_option(codes::CLIENT_UUID, id.clone());
        }
    }
}

impl NetbootConfig {
    fn http_next_server(&self) -> Ipv4Addr {
        match self.http_binary_url.host() {
            Some(Host::Ipv4(ip)) => ip,
            _ => Ipv4Addr::UNSPECIFIED,
        }
    }

    fn http_binary(&self, binary: &str) -> String {
        format!("{}/{binary}", self.http_binary_url.as_str().trim_end_matches('/'))
    }

    fn tftp_binary(&self, binary: &str) -> String {
        let host = self.tftp_addr.ip().to_string();
        format!("tftp://{}/{binary}", authority("tftp", &host, self.tftp_addr.port()))
    }

    /// Build the boot options for `request`, or `None` when the client's
    /// architecture has no matching binary.
    ///
    /// `vlan_id` is only passed in reservation mode.
    pub fn build(&self, request: &BootRequest, vlan_id: Option<&str>) -> Option<NetbootOptions> {
        let arch = ClientArch::from_u16(request.arch?);
        let binary = arch.boot_binary()?;
        let client_type = request
            .vendor_class
            .as_deref()
            .and_then(ClientType::from_vendor_class)
            .unwrap_or(ClientType::Pxe);
        let user_class = request.user_class.as_deref();

        let (next_server, boot_file) = if user_class == Some(self.custom_user_class.as_str()) {
            (
                Ipv4Addr::UNSPECIFIED,
                self.script_url.for_client(&request.mac).to_string(),
            )
        } else if client_type == ClientType::Http {
            (self.http_next_server(), self.http_binary(binary))
        } else if user_class == Some(IPXE_USER_CLASS) {
            (*self.tftp_addr.ip(), self.tftp_binary(binary))
        } else {
            (*self.tftp_addr.ip(), binary.to_string())
        };

        let mut vendor_options = PXE_DISCOVERY_CONTROL.to_vec();
        if let Some(vlan) = vlan_id.filter(|v| !v.is_empty()) {
            match parse_vlan_id(vlan) {
                Some(id) => {
                    let id = id.to_string();
                    vendor_options.push(PXE_VLAN_SUBOPTION);
                    vendor_options.push(id.len() as u8);
                    vendor_options.extend_from_slice(id.as_bytes());
                }
                None => warn!(mac = %request.mac, vlan_id = vlan, "ignoring invalid VLAN id"),
            }
        }

        Some(NetbootOptions {
            next_server,
            boot_file,
            client_type,
            vendor_options,
            machine_id: request.machine_id.clone(),
        })
    }
}

/// 802.1Q VLAN id, 0 through 4095.
fn parse_vlan_id(vlan: &str) -> Option<u16> {
    vlan.trim().parse::<u16>().ok().filter(|id| *id <= MAX_VLAN_ID)
}
