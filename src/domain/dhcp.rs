//! Decoded DHCPv4 packets.
//!
//! What the parser produces from a datagram, before it is narrowed to a
//! [`BootRequest`](super::BootRequest).

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

/// Option 53 values (RFC 2132 section 9.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    const ALL: [Self; 8] = [
        Self::Discover,
        Self::Offer,
        Self::Request,
        Self::Decline,
        Self::Ack,
        Self::Nak,
        Self::Release,
        Self::Inform,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_u8() == value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// What a server answers with. Only DISCOVER and REQUEST get answers.
    pub fn reply_type(self) -> Option<Self> {
        match self {
            Self::Discover => Some(Self::Offer),
            Self::Request => Some(Self::Ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Request => "REQUEST",
            Self::Decline => "DECLINE",
            Self::Ack => "ACK",
            Self::Nak => "NAK",
            Self::Release => "RELEASE",
            Self::Inform => "INFORM",
        };
        f.write_str(name)
    }
}

/// Options the netboot path reads. Everything else is kept as `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    MessageType(DhcpMessageType),
    RequestedIp(Ipv4Addr),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    /// 60, e.g. `PXEClient:Arch:00007:UNDI:003016`
    VendorClassId(String),
    ClientId(Vec<u8>),
    /// 77, sent as a raw string by iPXE
    UserClass(String),
    /// 93
    ClientArch(u16),
    /// 94
    ClientNdi(Vec<u8>),
    /// 97
    ClientUuid(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

/// BOOTP header fields plus the decoded options, in wire order.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// 1 for BOOTREQUEST, 2 for BOOTREPLY
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    /// Relay agent address
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr6,
    pub sname: Option<String>,
    pub file: Option<String>,
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    pub fn is_request(&self) -> bool {
        self.op == 1
    }

    /// First option `pick` accepts. Repeated options are not merged.
    fn find<'a, T>(&'a self, pick: impl Fn(&'a DhcpOption) -> Option<T>) -> Option<T> {
        self.options.iter().find_map(pick)
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find(|o| match o {
            DhcpOption::MessageType(t) => Some(*t),
            _ => None,
        })
    }

    pub fn vendor_class_id(&self) -> Option<&str> {
        self.find(|o| match o {
            DhcpOption::VendorClassId(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn user_class(&self) -> Option<&str> {
        self.find(|o| match o {
            DhcpOption::UserClass(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.find(|o| match o {
            DhcpOption::RequestedIp(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn client_arch(&self) -> Option<u16> {
        self.find(|o| match o {
            DhcpOption::ClientArch(arch) => Some(*arch),
            _ => None,
        })
    }

    pub fn client_ndi(&self) -> Option<&[u8]> {
        self.find(|o| match o {
            DhcpOption::ClientNdi(ndi) => Some(ndi.as_slice()),
            _ => None,
        })
    }

    pub fn client_uuid(&self) -> Option<&[u8]> {
        self.find(|o| match o {
            DhcpOption::ClientUuid(id) => Some(id.as_slice()),
            _ => None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn packet_with(op: u8, options: Vec<DhcpOption>) -> DhcpPacket {
        DhcpPacket {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x12345678,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff),
            sname: None,
            file: None,
            options,
        }
    }

    mod dhcp_message_type_tests {
        use super::*;

        #[test]
        fn test_wire_values() {
            for value in 1..=8 {
                let msg = DhcpMessageType::from_u8(value).unwrap();
                assert_eq!(msg.as_u8(), value);
            }
        }

        #[test]
        fn test_from_u8_invalid_values() {
            assert_eq!(DhcpMessageType::from_u8(0), None);
            assert_eq!(DhcpMessageType::from_u8(9), None);
            assert_eq!(DhcpMessageType::from_u8(255), None);
        }

        #[test]
        fn test_reply_type() {
            assert_eq!(
                DhcpMessageType::Discover.reply_type(),
                Some(DhcpMessageType::Offer)
            );
            assert_eq!(
                DhcpMessageType::Request.reply_type(),
                Some(DhcpMessageType::Ack)
            );
            assert_eq!(DhcpMessageType::Release.reply_type(), None);
            assert_eq!(DhcpMessageType::Inform.reply_type(), None);
        }

        #[test]
        fn test_display() {
            assert_eq!(format!("{}", DhcpMessageType::Discover), "DISCOVER");
            assert_eq!(format!("{}", DhcpMessageType::Ack), "ACK");
        }
    }

    mod dhcp_packet_tests {
        use super::*;

        #[test]
        fn test_is_request() {
            assert!(packet_with(1, vec![]).is_request());
            assert!(!packet_with(2, vec![]).is_request());
        }

        #[test]
        fn test_accessors_absent() {
            let packet = packet_with(1, vec![]);
            assert_eq!(packet.message_type(), None);
            assert_eq!(packet.vendor_class_id(), None);
            assert_eq!(packet.user_class(), None);
            assert_eq!(packet.client_arch(), None);
            assert_eq!(packet.client_ndi(), None);
            assert_eq!(packet.client_uuid(), None);
            assert_eq!(packet.requested_ip(), None);
        }

        #[test]
        fn test_accessors_find_their_option() {
            let packet = packet_with(
                1,
                vec![
                    DhcpOption::MessageType(DhcpMessageType::Discover),
                    DhcpOption::VendorClassId("PXEClient".to_string()),
                    DhcpOption::UserClass("iPXE".to_string()),
                    DhcpOption::ClientArch(7),
                    DhcpOption::ClientNdi(vec![0x01, 0x03, 0x10]),
                    DhcpOption::ClientUuid(vec![0x01, 0x02]),
                    DhcpOption::RequestedIp(Ipv4Addr::new(192, 168, 1, 100)),
                    DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 1)),
                    DhcpOption::Unknown(200, vec![0x01, 0x02]),
                ],
            );

            assert_eq!(packet.message_type(), Some(DhcpMessageType::Discover));
            assert_eq!(packet.vendor_class_id(), Some("PXEClient"));
            assert_eq!(packet.user_class(), Some("iPXE"));
            assert_eq!(packet.client_arch(), Some(7));
            assert_eq!(packet.client_ndi(), Some(&[0x01, 0x03, 0x10][..]));
            assert_eq!(packet.client_uuid(), Some(&[0x01, 0x02][..]));
            assert_eq!(packet.requested_ip(), Some(Ipv4Addr::new(192, 168, 1, 100)));
        }

        #[test]
        fn test_first_option_wins() {
            let packet = packet_with(
                1,
                vec![
                    DhcpOption::MessageType(DhcpMessageType::Request),
                    DhcpOption::MessageType(DhcpMessageType::Discover),
                ],
            );
            assert_eq!(packet.message_type(), Some(DhcpMessageType::Request));
        }
    }
}
