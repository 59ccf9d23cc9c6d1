//! netbootd: network boot control plane.
//!
//! Answers DHCP and ProxyDHCP for machines booting from the network, serves
//! the iPXE binaries over TFTP and HTTP, renders per-client boot scripts and
//! streams installer images with the client's kernel command line patched in.

pub mod backend;
pub mod config;
pub mod dhcp;
pub mod domain;
pub mod error;
pub mod ipxe;
pub mod iso;
pub mod net;
pub mod routes;
pub mod syslog;
pub mod telemetry;
pub mod tftp;
pub mod urls;
