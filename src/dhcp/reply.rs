//! Outbound reply description and its wire encoding.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use macaddr::MacAddr6;

use super::codes;
use crate::domain::{BootRequest, DhcpMessageType};

/// Replies are padded to the BOOTP minimum.
const MIN_REPLY_SIZE: usize = 300;

/// An outbound DHCP reply, ready to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_type: DhcpMessageType,
    pub xid: u32,
    pub flags: u16,
    pub hops: u8,
    pub mac: MacAddr6,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub sname: Option<String>,
    pub file: Option<String>,
    /// Options in wire order, excluding 53 which is always written first.
    pub options: Vec<(u8, Vec<u8>)>,
    pub destination: SocketAddr,
}

impl Reply {
    /// An empty reply addressed back to the sender of `request`.
    pub fn to_request(request: &BootRequest, message_type: DhcpMessageType) -> Self {
        Self {
            message_type,
            xid: request.xid,
            flags: request.flags,
            hops: request.hops,
            mac: request.mac,
            ciaddr: request.ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            sname: None,
            file: None,
            options: Vec::new(),
            destination: destination_for(request),
        }
    }

    /// Set an option, replacing any previous value for the same code.
    pub fn set_option(&mut self, code: u8, data: impl Into<Vec<u8>>) {
        let data = data.into();
        match self.options.iter_mut().find(|(c, _)| *c == code) {
            Some(existing) => existing.1 = data,
            None => self.options.push((code, data)),
        }
    }

    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, data)| data.as_slice())
    }

    /// Serialize into a BOOTREPLY datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 240];

        out[0] = 2;
        out[1] = 1;
        out[2] = 6;
        out[3] = self.hops;
        out[4..8].copy_from_slice(&self.xid.to_be_bytes());
        // secs stays 0
        out[10..12].copy_from_slice(&self.flags.to_be_bytes());
        out[12..16].copy_from_slice(&self.ciaddr.octets());
        out[16..20].copy_from_slice(&self.yiaddr.octets());
        out[20..24].copy_from_slice(&self.siaddr.octets());
        out[24..28].copy_from_slice(&self.giaddr.octets());
        out[28..34].copy_from_slice(self.mac.as_bytes());

        if let Some(sname) = &self.sname {
            write_truncated(&mut out[44..108], sname.as_bytes());
        }
        if let Some(file) = &self.file {
            write_truncated(&mut out[108..236], file.as_bytes());
        }

        out[236..240].copy_from_slice(&codes::MAGIC_COOKIE);

        out.extend_from_slice(&[codes::MESSAGE_TYPE, 1, self.message_type.as_u8()]);
        for (code, data) in &self.options {
            write_option(&mut out, *code, data);
        }
        out.push(codes::END);

        if out.len() < MIN_REPLY_SIZE {
            out.resize(MIN_REPLY_SIZE, 0);
        }
        out
    }
}

/// Where a reply to `request` goes.
///
/// Relayed requests go back to the relay; requests on the ProxyDHCP port are
/// answered unicast; clients with an address get unicast, others broadcast.
pub fn destination_for(request: &BootRequest) -> SocketAddr {
    if !request.giaddr.is_unspecified() {
        return SocketAddr::V4(SocketAddrV4::new(request.giaddr, codes::SERVER_PORT));
    }
    if request.local_port == codes::PROXY_PORT {
        return request.peer;
    }
    if !request.ciaddr.is_unspecified() {
        return SocketAddr::V4(SocketAddrV4::new(request.ciaddr, codes::CLIENT_PORT));
    }
    SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), codes::CLIENT_PORT)
}

/// Write an option, splitting values over 255 bytes into consecutive
/// instances (RFC 3396).
fn write_option(out: &mut Vec<u8>, code: u8, data: &[u8]) {
    if data.is_empty() {
        out.extend_from_slice(&[code, 0]);
        return;
    }
    for chunk in data.chunks(255) {
        out.push(code);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

/// Copy into a fixed field, leaving room for the terminating NUL.
fn write_truncated(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len() - 1);
    field[..len].copy_from_slice(&value[..len]);
}

/// Concatenated address list (options 3, 6, 7, 42).
pub fn ipv4_list(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs.iter().flat_map(|ip| ip.octets()).collect()
}

/// RFC 1035 name encoding without compression (option 119).
pub fn domain_search_list(domains: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for domain in domains {
        for label in domain.trim_end_matches('.').split('.') {
            if label.is_empty() {
                continue;
            }
            let label = &label.as_bytes()[..label.len().min(63)];
            out.push(label.len() as u8);
            out.extend_from_slice(label);
        }
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::parser::DhcpParser;
    use crate::domain::pxe_discover;

    mod destination_tests {
        use super::*;

        #[test]
        fn test_broadcast_by_default() {
            let req = pxe_discover(7);
            assert_eq!(destination_for(&req), "255.255.255.255:68".parse().unwrap());
        }

        #[test]
        fn test_relay_wins() {
            let mut req = pxe_discover(7);
            req.giaddr = Ipv4Addr::new(10, 1, 0, 1);
            req.ciaddr = Ipv4Addr::new(10, 1, 0, 50);
            req.local_port = codes::PROXY_PORT;
            assert_eq!(destination_for(&req), "10.1.0.1:67".parse().unwrap());
        }

        #[test]
        fn test_proxy_port_answers_sender() {
            let mut req = pxe_discover(7);
            req.local_port = codes::PROXY_PORT;
            req.peer = "10.1.0.50:68".parse().unwrap();
            assert_eq!(destination_for(&req), req.peer);
        }

        #[test]
        fn test_ciaddr_unicast() {
            let mut req = pxe_discover(7);
            req.ciaddr = Ipv4Addr::new(10, 1, 0, 50);
            assert_eq!(destination_for(&req), "10.1.0.50:68".parse().unwrap());
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_encode_parses_back() {
            let req = pxe_discover(7);
            let mut reply = Reply::to_request(&req, DhcpMessageType::Offer);
            reply.siaddr = Ipv4Addr::new(10, 0, 0, 2);
            reply.file = Some("ipxe.efi".to_string());
            reply.set_option(codes::SERVER_ID, Ipv4Addr::new(10, 0, 0, 2).octets());
            reply.set_option(codes::VENDOR_CLASS_ID, b"PXEClient".to_vec());

            let bytes = reply.encode();
            assert!(bytes.len() >= MIN_REPLY_SIZE);
            assert_eq!(bytes[0], 2);

            // The parser only accepts requests, so flip op to read it back
            let mut as_request = bytes.clone();
            as_request[0] = 1;
            let parsed = DhcpParser::new().parse(&as_request).unwrap();
            assert_eq!(parsed.xid, req.xid);
            assert_eq!(parsed.flags, 0x8000);
            assert_eq!(parsed.chaddr, req.mac);
            assert_eq!(parsed.siaddr, Ipv4Addr::new(10, 0, 0, 2));
            assert_eq!(parsed.yiaddr, Ipv4Addr::UNSPECIFIED);
            assert_eq!(parsed.file.as_deref(), Some("ipxe.efi"));
            assert_eq!(parsed.message_type(), Some(DhcpMessageType::Offer));
            assert_eq!(parsed.vendor_class_id(), Some("PXEClient"));
        }

        #[test]
        fn test_set_option_replaces() {
            let mut reply = Reply::to_request(&pxe_discover(0), DhcpMessageType::Offer);
            reply.set_option(codes::VENDOR_CLASS_ID, b"PXEClient".to_vec());
            reply.set_option(codes::VENDOR_CLASS_ID, b"HTTPClient".to_vec());
            assert_eq!(reply.options.len(), 1);
            assert_eq!(reply.option(codes::VENDOR_CLASS_ID), Some(&b"HTTPClient"[..]));
        }

        #[test]
        fn test_long_option_is_split() {
            let mut out = Vec::new();
            write_option(&mut out, 119, &[7u8; 300]);
            assert_eq!(out.len(), 2 + 255 + 2 + 45);
            assert_eq!(&out[..2], &[119, 255]);
            assert_eq!(&out[257..259], &[119, 45]);
        }

        #[test]
        fn test_long_boot_file_is_truncated() {
            let mut reply = Reply::to_request(&pxe_discover(0), DhcpMessageType::Offer);
            reply.file = Some("x".repeat(200));
            let bytes = reply.encode();
            assert_eq!(bytes[108 + 126], b'x');
            assert_eq!(bytes[108 + 127], 0);
        }
    }

    mod value_tests {
        use super::*;

        #[test]
        fn test_ipv4_list() {
            let list = ipv4_list(&[Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 4, 4)]);
            assert_eq!(list, vec![1, 1, 1, 1, 8, 8, 4, 4]);
        }

        #[test]
        fn test_domain_search_list() {
            let encoded = domain_search_list(&["eng.example.com".to_string(), "lab.".to_string()]);
            assert_eq!(
                encoded,
                b"\x03eng\x07example\x03com\x00\x03lab\x00".to_vec()
            );
        }
    }
}
