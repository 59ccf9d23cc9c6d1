use std::net::IpAddr;

use macaddr::MacAddr6;

use super::BootRecordLookup;
use crate::domain::BootRecord;
use crate::error::LookupError;

/// Store that knows nothing and allows everything. Only valid in auto-proxy
/// mode, where the DHCP path never consults a store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

#[async_trait::async_trait]
impl BootRecordLookup for NoopBackend {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn lookup(&self, _mac: MacAddr6) -> Result<Option<BootRecord>, LookupError> {
        Ok(Some(BootRecord::netboot_only()))
    }

    async fn lookup_by_ip(&self, _ip: IpAddr) -> Result<Option<(MacAddr6, BootRecord)>, LookupError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_found_and_boot_enabled() {
        let record = NoopBackend.lookup(MacAddr6::nil()).await.unwrap().unwrap();
        assert!(record.allows_netboot());
        assert_eq!(record.dhcp.ip_address, None);
    }

    #[tokio::test]
    async fn test_ip_lookup_finds_nothing() {
        let found = NoopBackend
            .lookup_by_ip("10.0.0.1".parse().unwrap())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
