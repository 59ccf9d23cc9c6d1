//! Record stores.
//!
//! Exactly one store is active at a time; `config` enforces that at startup.
//! The DHCP handler and the HTTP routes only see `Arc<dyn BootRecordLookup>`.

mod file;
mod noop;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use macaddr::MacAddr6;

use crate::domain::BootRecord;
use crate::error::LookupError;

pub use file::FileBackend;
pub use noop::NoopBackend;

/// Resolves a client to its boot record.
///
/// All methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait BootRecordLookup: Send + Sync + fmt::Debug {
    /// Short store name for logs.
    fn name(&self) -> &'static str;

    /// Find the record for a hardware address. `Ok(None)` means "not found".
    async fn lookup(&self, mac: MacAddr6) -> Result<Option<BootRecord>, LookupError>;

    /// Find the record whose allocated address is `ip`, with its hardware address.
    async fn lookup_by_ip(&self, ip: IpAddr) -> Result<Option<(MacAddr6, BootRecord)>, LookupError>;
}

/// `lookup` bounded by `timeout`; running out of time is a lookup failure.
pub async fn lookup_with_timeout(
    backend: &dyn BootRecordLookup,
    mac: MacAddr6,
    timeout: Duration,
) -> Result<Option<BootRecord>, LookupError> {
    tokio::time::timeout(timeout, backend.lookup(mac))
        .await
        .map_err(|_| LookupError::Timeout(timeout))?
}

/// `lookup_by_ip` bounded by `timeout`.
pub async fn lookup_by_ip_with_timeout(
    backend: &dyn BootRecordLookup,
    ip: IpAddr,
    timeout: Duration,
) -> Result<Option<(MacAddr6, BootRecord)>, LookupError> {
    tokio::time::timeout(timeout, backend.lookup_by_ip(ip))
        .await
        .map_err(|_| LookupError::Timeout(timeout))?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that counts calls and can be made slow or failing.
    #[derive(Debug, Default)]
    pub(crate) struct FakeBackend {
        pub records: HashMap<MacAddr6, BootRecord>,
        pub delay: Option<Duration>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl FakeBackend {
        pub(crate) fn with(mac: MacAddr6, record: BootRecord) -> Self {
            Self {
                records: HashMap::from([(mac, record)]),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl BootRecordLookup for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn lookup(&self, mac: MacAddr6) -> Result<Option<BootRecord>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(LookupError::InvalidKey("boom".to_string()));
            }
            Ok(self.records.get(&mac).cloned())
        }

        async fn lookup_by_ip(
            &self,
            ip: IpAddr,
        ) -> Result<Option<(MacAddr6, BootRecord)>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .iter()
                .find(|(_, r)| r.dhcp.ip_address.map(IpAddr::V4) == Some(ip))
                .map(|(mac, r)| (*mac, r.clone())))
        }
    }

    #[tokio::test]
    async fn test_lookup_with_timeout_passes_through() {
        let mac = MacAddr6::new(0, 1, 2, 3, 4, 5);
        let backend = FakeBackend::with(mac, BootRecord::netboot_only());
        let found = lookup_with_timeout(&backend, mac, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_lookup_with_timeout_expires() {
        let backend = FakeBackend {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let result =
            lookup_with_timeout(&backend, MacAddr6::nil(), Duration::from_millis(100)).await;
        assert!(matches!(result, Err(LookupError::Timeout(_))));
    }
}
