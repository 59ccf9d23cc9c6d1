//! DHCPv4 wire decoding (RFC 2131 header, RFC 2132 options).

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use super::codes;
use crate::domain::{DhcpMessageType, DhcpOption, DhcpPacket};
use crate::error::ParseError;

/// BOOTP header through the magic cookie.
const HEADER_LEN: usize = 240;

#[derive(Debug, Default, Clone, Copy)]
pub struct DhcpParser;

impl DhcpParser {
    pub fn new() -> Self {
        Self
    }

    /// Decode one UDP payload. Only Ethernet hardware addresses are accepted.
    pub fn parse(&self, data: &[u8]) -> Result<DhcpPacket, ParseError> {
        let Some((header, options)) = data.split_first_chunk::<HEADER_LEN>() else {
            return Err(ParseError::PacketTooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        };

        let (htype, hlen) = (header[1], header[2]);
        if (htype, hlen) != (1, 6) {
            return Err(ParseError::UnsupportedHardware { htype, hlen });
        }
        if header[236..] != codes::MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        let be16 = |at: usize| u16::from_be_bytes([header[at], header[at + 1]]);
        let ip = |at: usize| {
            Ipv4Addr::new(header[at], header[at + 1], header[at + 2], header[at + 3])
        };
        let mac = &header[28..34];

        Ok(DhcpPacket {
            op: header[0],
            htype,
            hlen,
            hops: header[3],
            xid: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            secs: be16(8),
            flags: be16(10),
            ciaddr: ip(12),
            yiaddr: ip(16),
            siaddr: ip(20),
            giaddr: ip(24),
            chaddr: MacAddr6::new(mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]),
            sname: c_string(&header[44..108]),
            file: c_string(&header[108..236]),
            options: decode_options(options)?,
        })
    }
}

/// Walk the TLV area after the cookie. Offsets in errors are relative to it.
fn decode_options(area: &[u8]) -> Result<Vec<DhcpOption>, ParseError> {
    let mut decoded = Vec::new();
    let mut pos = 0;

    while let Some(&code) = area.get(pos) {
        match code {
            codes::END => break,
            codes::PAD => {
                pos += 1;
                continue;
            }
            _ => {}
        }

        let Some(&len) = area.get(pos + 1) else {
            return Err(ParseError::InvalidOption {
                offset: pos,
                message: "length byte missing".to_string(),
            });
        };
        let body_start = pos + 2;
        let Some(body) = area.get(body_start..body_start + len as usize) else {
            return Err(ParseError::InvalidOption {
                offset: pos,
                message: format!(
                    "option {code} declares {len} bytes, only {} left",
                    area.len() - body_start
                ),
            });
        };

        decoded.extend(decode_option(code, body));
        pos = body_start + len as usize;
    }

    Ok(decoded)
}

/// Malformed values of the typed options are dropped rather than failing
/// the whole packet.
fn decode_option(code: u8, body: &[u8]) -> Option<DhcpOption> {
    let ipv4 = || -> Option<Ipv4Addr> { <[u8; 4]>::try_from(body).ok().map(Ipv4Addr::from) };

    match code {
        codes::MESSAGE_TYPE => body
            .first()
            .copied()
            .and_then(DhcpMessageType::from_u8)
            .map(DhcpOption::MessageType),
        codes::REQUESTED_IP => ipv4().map(DhcpOption::RequestedIp),
        codes::SERVER_ID => ipv4().map(DhcpOption::ServerIdentifier),
        codes::PARAMETER_REQUEST_LIST => Some(DhcpOption::ParameterRequestList(body.to_vec())),
        codes::VENDOR_CLASS_ID => std::str::from_utf8(body)
            .ok()
            .map(|v| DhcpOption::VendorClassId(v.to_string())),
        codes::CLIENT_ID => Some(DhcpOption::ClientId(body.to_vec())),
        codes::USER_CLASS => Some(DhcpOption::UserClass(
            String::from_utf8_lossy(body).into_owned(),
        )),
        // Clients may list several architectures; the first is the one booting.
        codes::CLIENT_ARCH => body
            .first_chunk::<2>()
            .map(|arch| DhcpOption::ClientArch(u16::from_be_bytes(*arch))),
        codes::CLIENT_NDI => Some(DhcpOption::ClientNdi(body.to_vec())),
        codes::CLIENT_UUID => Some(DhcpOption::ClientUuid(body.to_vec())),
        other => Some(DhcpOption::Unknown(other, body.to_vec())),
    }
}

/// NUL-terminated header field; empty fields are `None`.
fn c_string(field: &[u8]) -> Option<String> {
    let text = field.split(|&b| b == 0).next().unwrap_or_default();
    if text.is_empty() {
        return None;
    }
    std::str::from_utf8(text).ok().map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a raw BOOTREQUEST with the given options (code, data).
    pub(crate) fn raw_request(options: &[(u8, &[u8])]) -> Vec<u8> {
        let mut packet = vec![0u8; 240];
        packet[0] = 1;
        packet[1] = 1;
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&codes::MAGIC_COOKIE);
        for (code, data) in options {
            packet.push(*code);
            packet.push(data.len() as u8);
            packet.extend_from_slice(data);
        }
        packet.push(codes::END);
        packet
    }

    mod header_tests {
        use super::*;

        #[test]
        fn test_parse_minimum_packet() {
            let data = raw_request(&[(codes::MESSAGE_TYPE, &[1])]);
            let dhcp = DhcpParser::new().parse(&data).unwrap();

            assert_eq!(dhcp.op, 1);
            assert_eq!(dhcp.xid, 0x12345678);
            assert_eq!(dhcp.chaddr, MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff));
            assert_eq!(dhcp.message_type(), Some(DhcpMessageType::Discover));
            assert_eq!(dhcp.sname, None);
            assert_eq!(dhcp.file, None);
        }

        #[test]
        fn test_parse_addresses() {
            let mut data = raw_request(&[(codes::MESSAGE_TYPE, &[3])]);
            data[12..16].copy_from_slice(&[10, 0, 0, 9]);
            data[24..28].copy_from_slice(&[10, 0, 0, 1]);
            data[3] = 2;

            let dhcp = DhcpParser::new().parse(&data).unwrap();
            assert_eq!(dhcp.ciaddr, Ipv4Addr::new(10, 0, 0, 9));
            assert_eq!(dhcp.giaddr, Ipv4Addr::new(10, 0, 0, 1));
            assert_eq!(dhcp.hops, 2);
        }

        #[test]
        fn test_packet_too_short() {
            let result = DhcpParser::new().parse(&[0u8; 100]);
            assert_eq!(
                result.unwrap_err(),
                ParseError::PacketTooShort {
                    expected: 240,
                    actual: 100
                }
            );
        }

        #[test]
        fn test_invalid_magic_cookie() {
            let mut data = raw_request(&[]);
            data[236] = 0;
            assert_eq!(
                DhcpParser::new().parse(&data).unwrap_err(),
                ParseError::InvalidMagicCookie
            );
        }

        #[test]
        fn test_non_ethernet_rejected() {
            let mut data = raw_request(&[]);
            data[1] = 6;
            assert!(matches!(
                DhcpParser::new().parse(&data),
                Err(ParseError::UnsupportedHardware { htype: 6, .. })
            ));
        }
    }

    mod option_tests {
        use super::*;

        #[test]
        fn test_parse_netboot_options() {
            let data = raw_request(&[
                (codes::MESSAGE_TYPE, &[1]),
                (codes::VENDOR_CLASS_ID, b"PXEClient:Arch:00007:UNDI:003016"),
                (codes::USER_CLASS, b"iPXE"),
                (codes::CLIENT_ARCH, &[0, 7]),
                (codes::CLIENT_NDI, &[1, 3, 16]),
                (codes::PARAMETER_REQUEST_LIST, &[1, 3, 43, 60]),
            ]);
            let dhcp = DhcpParser::new().parse(&data).unwrap();

            assert_eq!(dhcp.vendor_class_id(), Some("PXEClient:Arch:00007:UNDI:003016"));
            assert_eq!(dhcp.user_class(), Some("iPXE"));
            assert_eq!(dhcp.client_arch(), Some(7));
            assert_eq!(dhcp.client_ndi(), Some(&[1, 3, 16][..]));
        }

        #[test]
        fn test_pad_options_are_skipped() {
            let mut data = raw_request(&[]);
            data.pop();
            data.extend_from_slice(&[codes::PAD, codes::PAD, codes::MESSAGE_TYPE, 1, 1, codes::END]);
            let dhcp = DhcpParser::new().parse(&data).unwrap();
            assert_eq!(dhcp.message_type(), Some(DhcpMessageType::Discover));
        }

        #[test]
        fn test_truncated_option() {
            let mut data = raw_request(&[]);
            data.pop();
            data.extend_from_slice(&[codes::VENDOR_CLASS_ID, 20, b'P']);
            assert!(matches!(
                DhcpParser::new().parse(&data),
                Err(ParseError::InvalidOption { offset: 0, .. })
            ));
        }

        #[test]
        fn test_missing_length() {
            let mut data = raw_request(&[]);
            data.pop();
            data.push(codes::VENDOR_CLASS_ID);
            assert!(matches!(
                DhcpParser::new().parse(&data),
                Err(ParseError::InvalidOption { .. })
            ));
        }

        #[test]
        fn test_malformed_fixed_width_options_are_dropped() {
            let data = raw_request(&[(codes::REQUESTED_IP, &[10, 0]), (codes::CLIENT_ARCH, &[7])]);
            let dhcp = DhcpParser::new().parse(&data).unwrap();
            assert_eq!(dhcp.requested_ip(), None);
            assert_eq!(dhcp.client_arch(), None);
        }
    }
}
