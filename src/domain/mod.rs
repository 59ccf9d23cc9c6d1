//! Domain models for network boot.
//!
//! Types here are independent of sockets, HTTP and storage.

mod dhcp;
mod pxe;
mod record;
mod request;

pub use dhcp::{DhcpMessageType, DhcpOption, DhcpPacket};
pub use pxe::{ClientArch, ClientType, DEFAULT_CUSTOM_USER_CLASS, IPXE_USER_CLASS};
pub use record::{BootRecord, DhcpRecord, NetbootRecord, OsieRecord, DEFAULT_LEASE_TIME};
pub use request::BootRequest;

#[cfg(test)]
pub(crate) use request::tests::pxe_discover;
