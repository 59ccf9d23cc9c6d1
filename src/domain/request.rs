//! The immutable view of a client request that the handler works from.

use std::net::{Ipv4Addr, SocketAddr};

use macaddr::MacAddr6;

use super::dhcp::{DhcpMessageType, DhcpPacket};

/// Parsed subset of an inbound DHCP packet plus where it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRequest {
    pub xid: u32,
    pub flags: u16,
    pub hops: u8,
    pub mac: MacAddr6,
    pub message_type: DhcpMessageType,
    pub ciaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    /// Option 50
    pub requested_ip: Option<Ipv4Addr>,
    /// Option 93
    pub arch: Option<u16>,
    /// Option 94
    pub client_ndi: Option<Vec<u8>>,
    /// Option 97
    pub machine_id: Option<Vec<u8>>,
    /// Option 60
    pub vendor_class: Option<String>,
    /// Option 77
    pub user_class: Option<String>,
    /// Address the datagram came from.
    pub peer: SocketAddr,
    /// Local port the datagram arrived on (67 or 4011).
    pub local_port: u16,
}

impl BootRequest {
    /// Build a request from a decoded packet. Returns `None` for replies and
    /// for BOOTP packets that carry no DHCP message type.
    pub fn from_packet(packet: DhcpPacket, peer: SocketAddr, local_port: u16) -> Option<Self> {
        if !packet.is_request() {
            return None;
        }
        let message_type = packet.message_type()?;

        Some(Self {
            xid: packet.xid,
            flags: packet.flags,
            hops: packet.hops,
            mac: packet.chaddr,
            message_type,
            ciaddr: packet.ciaddr,
            giaddr: packet.giaddr,
            requested_ip: packet.requested_ip(),
            arch: packet.client_arch(),
            client_ndi: packet.client_ndi().map(<[u8]>::to_vec),
            machine_id: packet.client_uuid().map(<[u8]>::to_vec),
            vendor_class: packet.vendor_class_id().map(str::to_string),
            user_class: packet.user_class().map(str::to_string),
            peer,
            local_port,
        })
    }
}
