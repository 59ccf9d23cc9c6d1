//! TFTP server module.
//!
//! Serves the iPXE binaries to firmware that cannot speak HTTP.

pub mod packet;
mod server;

pub use server::{TftpServer, TftpSettings};
