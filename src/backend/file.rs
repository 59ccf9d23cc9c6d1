//! Flat-file store.
//!
//! A single YAML document mapping hardware addresses to boot records. The file
//! is re-read on every lookup so edits take effect without a restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use macaddr::MacAddr6;

use super::BootRecordLookup;
use crate::domain::BootRecord;
use crate::error::{ConfigError, LookupError};

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Open the store, checking that the file exists and parses.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let backend = Self { path: path.into() };
        backend.load().await.map_err(|e| ConfigError::Backend {
            path: backend.path.clone(),
            message: e.to_string(),
        })?;
        Ok(backend)
    }

    async fn load(&self) -> Result<HashMap<MacAddr6, BootRecord>, LookupError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| LookupError::Read {
                path: self.path.clone(),
                source: e,
            })?;
        parse_records(&self.path, &content)
    }
}

/// Decode the document, normalizing every key to a `MacAddr6`.
fn parse_records(path: &Path, content: &str) -> Result<HashMap<MacAddr6, BootRecord>, LookupError> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let raw: HashMap<String, BootRecord> =
        serde_yaml::from_str(content).map_err(|e| LookupError::Decode {
            path: path.to_path_buf(),
            source: e,
        })?;

    raw.into_iter()
        .map(|(key, record)| {
            MacAddr6::from_str(key.trim())
                .map(|mac| (mac, record))
                .map_err(|_| LookupError::InvalidKey(key))
        })
        .collect()
}

#[async_trait::async_trait]
impl BootRecordLookup for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn lookup(&self, mac: MacAddr6) -> Result<Option<BootRecord>, LookupError> {
        let mut records = self.load().await?;
        Ok(records.remove(&mac))
    }

    async fn lookup_by_ip(&self, ip: IpAddr) -> Result<Option<(MacAddr6, BootRecord)>, LookupError> {
        let IpAddr::V4(ip) = ip else {
            return Ok(None);
        };
        let records = self.load().await?;
        Ok(records
            .into_iter()
            .find(|(_, record)| record.dhcp.ip_address == Some(ip)))
    }
}
