//! An image source with a per-request patch laid over its marker.

use futures::stream::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::patch::{overlay, Marker, MarkerScanner};
use super::source::{ByteStream, ImageSource};
use crate::error::PatchError;

const SCAN_WINDOW: u64 = 4 * 1024 * 1024;

/// Shared by all requests for the same image. The marker offset is found
/// once and remembered; each stream owns its own cursor.
#[derive(Debug)]
pub struct PatchedImage {
    source: Box<dyn ImageSource>,
    marker: Marker,
    location: OnceCell<u64>,
}

impl PatchedImage {
    pub fn new(source: Box<dyn ImageSource>, marker: Marker) -> Self {
        Self {
            source,
            marker,
            location: OnceCell::new(),
        }
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub async fn len(&self) -> Result<u64, PatchError> {
        self.source.len().await
    }

    /// Absolute offset of the marker, scanning the source on first use.
    pub async fn marker_offset(&self) -> Result<u64, PatchError> {
        self.location
            .get_or_try_init(|| self.scan())
            .await
            .copied()
    }

    async fn scan(&self) -> Result<u64, PatchError> {
        let total = self.source.len().await?;
        let mut scanner = MarkerScanner::new(&self.marker);
        let mut pos = 0;

        // The scanner counts offsets from the bytes it is fed, so the next
        // window starts where this one actually ended.
        while pos < total {
            let window = SCAN_WINDOW.min(total - pos);
            let mut chunks = self.source.read_range(pos, window).await?;
            let mut received = 0;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                received += chunk.len() as u64;
                if let Some(offset) = scanner.feed(&chunk) {
                    info!(offset, "located patch marker");
                    return Ok(offset);
                }
            }
            if received == 0 {
                return Err(PatchError::Source(format!(
                    "no data returned for range starting at {pos}"
                )));
            }
            pos += received;
        }

        Err(PatchError::MarkerNotFound)
    }

    /// Stream `len` bytes from `start` with `payload` written over the marker.
    /// Fails up front when the payload does not fit or the marker is absent,
    /// so unpatched bytes are never sent.
    pub async fn stream(
        &self,
        payload: &[u8],
        start: u64,
        len: u64,
    ) -> Result<ByteStream, PatchError> {
        let patch = self.marker.pad(payload)?;
        let patch_start = self.marker_offset().await?;
        debug!(start, len, patch_start, "streaming patched range");

        let inner = self.source.read_range(start, len).await?;
        let stream = inner.scan(start, move |cursor, item| {
            let next = item.map(|chunk| {
                let chunk_start = *cursor;
                *cursor += chunk.len() as u64;
                let chunk_end = *cursor;
                let patch_end = patch_start + patch.len() as u64;
                if chunk_end <= patch_start || chunk_start >= patch_end {
                    return chunk;
                }
                let mut owned = chunk.to_vec();
                overlay(&mut owned, chunk_start, &patch, patch_start);
                owned.into()
            });
            futures::future::ready(Some(next))
        });

        Ok(stream.boxed())
    }
}
