//! iPXE bootloader binaries served over HTTP and TFTP.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::PatchError;
use crate::iso::patch::{patch_buffer, Marker};

/// Placeholder compiled into the iPXE binaries where an embedded script may
/// be written.
pub const EMBEDDED_SCRIPT_MARKER: &str =
    "#a8b7e61f1075c37a793f2f92cee89f7bba00c4a8d7842ce3d40b5889032d8881";

/// Optional embedded-script patch applied to every binary read.
#[derive(Debug, Clone)]
pub struct BinaryPatch {
    pub marker: Marker,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BinaryStore {
    dir: PathBuf,
    patch: Option<BinaryPatch>,
}

impl BinaryStore {
    pub fn new(dir: impl Into<PathBuf>, patch: Option<BinaryPatch>) -> Self {
        Self {
            dir: dir.into(),
            patch,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a requested name to a file under the store directory. Leading
    /// slashes are ignored; `..`, roots and prefixes are refused.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return None;
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.dir.join(relative))
    }

    /// Read a binary with the embedded-script patch applied. `Ok(None)` when
    /// the name is refused or no such file exists.
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, PatchError> {
        let Some(path) = self.resolve(name) else {
            debug!(name, "refusing binary path");
            return Ok(None);
        };

        let mut data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Some(patch) = &self.patch {
            patch_buffer(&mut data, &patch.marker, &patch.script)?;
        }
        Ok(Some(data))
    }
}
