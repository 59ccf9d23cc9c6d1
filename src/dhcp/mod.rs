//! DHCP and ProxyDHCP.
//!
//! Wire parse and encode, netboot classification, the option builder, the
//! mode dispatcher and the UDP listener.

pub mod handler;
pub mod options;
pub mod parser;
pub mod reply;
pub mod server;

pub use handler::{classify, Handler, HandlerError, Ignored};
pub use options::{NetbootConfig, NetbootOptions};
pub use parser::DhcpParser;
pub use reply::Reply;
pub use server::DhcpServer;

/// Ports and option codes.
pub mod codes {
    pub const SERVER_PORT: u16 = 67;
    pub const CLIENT_PORT: u16 = 68;
    /// PXE boot server / ProxyDHCP port.
    pub const PROXY_PORT: u16 = 4011;

    pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVERS: u8 = 6;
    pub const LOG_SERVER: u8 = 7;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const BROADCAST_ADDRESS: u8 = 28;
    pub const NTP_SERVERS: u8 = 42;
    pub const VENDOR_SPECIFIC: u8 = 43;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const CLIENT_ID: u8 = 61;
    pub const USER_CLASS: u8 = 77;
    pub const CLIENT_ARCH: u8 = 93;
    pub const CLIENT_NDI: u8 = 94;
    pub const CLIENT_UUID: u8 = 97;
    pub const DOMAIN_SEARCH: u8 = 119;
    pub const END: u8 = 255;
}
