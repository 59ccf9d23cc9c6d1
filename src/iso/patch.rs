//! Length-preserving marker replacement.
//!
//! A patchable image carries a fixed marker string. The payload is padded
//! with spaces to the marker length and written over it, so every other
//! byte keeps its offset.

use crate::error::{ConfigError, PatchError};

/// Marker embedded in the installer image at build time.
pub const DEFAULT_MARKER: &str = "464vn90e7rbj08xbwdjejmdf4it17c5zfzjyfhthbh19eij201hjgit021bmpdb9ctrc87x2ymc8e7icu4ffi15x1hah9iyaiz38ckyap8hwx2vt5rm44ixv4hau8iw718q5yd019um5dt2xpqqa2rjtdypzr5v1gun8un110hhwp8cex7pqrh2ivh0ynpm4zkkwc8wcn367zyethzy7q8hzudyeyzx3cgmxqbkh825gcak7kxzjbgjajwizryv7ec1xm2h0hh7pz29qmvtgfjj1vphpgq1zcbiiehv52wrjy9yq473d9t1rvryy6929nk435hfx55du3ih05kn5tju3vijreru1p6knc988d4gfdz28eragvryq5x8aibe5trxd0t6t7jwxkde34v6pj1khmp50k6qqj3nzgcfzabtgqkmeqhdedbvwf3byfdma4nkv3rcxugaj2d0ru30pa2fqadjqrtjnv8bu52xzxv7irbhyvygygxu1nt5z4fh9w1vwbdcmagep26d298zknykf2e88kumt59ab7nq79d8amnhhvbexgh48e8qc61vq2e9qkihzt1twk1ijfgw70nwizai15iqyted2dt9gfmf2gg7amzufre79hwqkddc1cd935ywacnkrnak6r7xzcz7zbmq3kt04u2hg1iuupid8rt4nyrju51e6uejb2ruu36g9aibmz3hnmvazptu8x5tyxk820g2cdpxjdij766bt2n3djur7v623a2v44juyfgz80ekgfb9hkibpxh3zgknw8a34t4jifhf116x15cei9hwch0fye3xyq0acuym8uhitu5evc4rag3ui0fny3qg4kju7zkfyy8hwh537urd5uixkzwu5bdvafz4jmv7imypj543xg5em8jk8cgk7c4504xdd5e4e71ihaumt6u5u2t1w7um92fepzae8p0vq93wdrd1756npu1pziiur1payc7kmdwyxg3hj5n4phxbc29x0tcddamjrwt260b0w";

const PADDING: u8 = b' ';

/// A non-empty byte string to be located and overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker(Vec<u8>);

impl Marker {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConfigError::InvalidMarker("marker must not be empty".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Pad `payload` with spaces to the marker length.
    pub fn pad(&self, payload: &[u8]) -> Result<Vec<u8>, PatchError> {
        if payload.len() > self.len() {
            return Err(PatchError::PayloadTooLong {
                payload: payload.len(),
                marker: self.len(),
            });
        }
        let mut padded = payload.to_vec();
        padded.resize(self.len(), PADDING);
        Ok(padded)
    }

    /// Offset of the first occurrence in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        haystack
            .windows(self.len())
            .position(|window| window == self.as_bytes())
    }
}

/// Finds a marker across a sequence of chunks, including one that straddles
/// a chunk boundary.
#[derive(Debug)]
pub struct MarkerScanner<'a> {
    marker: &'a Marker,
    carry: Vec<u8>,
    consumed: u64,
}

impl<'a> MarkerScanner<'a> {
    pub fn new(marker: &'a Marker) -> Self {
        Self {
            marker,
            carry: Vec::with_capacity(marker.len()),
            consumed: 0,
        }
    }

    /// Feed the next chunk. Returns the absolute offset once the marker is seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<u64> {
        let mut window = std::mem::take(&mut self.carry);
        window.extend_from_slice(chunk);

        let window_start = self.consumed - (window.len() - chunk.len()) as u64;
        self.consumed += chunk.len() as u64;

        if let Some(pos) = self.marker.find_in(&window) {
            return Some(window_start + pos as u64);
        }

        let keep = (self.marker.len() - 1).min(window.len());
        self.carry = window.split_off(window.len() - keep);
        None
    }
}

/// Replace a whole buffer's marker. Used for small files held in memory.
pub fn patch_buffer(data: &mut [u8], marker: &Marker, payload: &[u8]) -> Result<(), PatchError> {
    let padded = marker.pad(payload)?;
    let offset = marker.find_in(data).ok_or(PatchError::MarkerNotFound)?;
    data[offset..offset + padded.len()].copy_from_slice(&padded);
    Ok(())
}

/// Copy the part of `patch` (placed at `patch_start`) that falls inside
/// `chunk` (placed at `chunk_start`).
pub fn overlay(chunk: &mut [u8], chunk_start: u64, patch: &[u8], patch_start: u64) {
    let chunk_end = chunk_start + chunk.len() as u64;
    let patch_end = patch_start + patch.len() as u64;
    let start = chunk_start.max(patch_start);
    let end = chunk_end.min(patch_end);
    if start >= end {
        return;
    }

    let dst = (start - chunk_start) as usize..(end - chunk_start) as usize;
    let src = (start - patch_start) as usize..(end - patch_start) as usize;
    chunk[dst].copy_from_slice(&patch[src]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(s: &str) -> Marker {
        Marker::new(s.as_bytes()).unwrap()
    }

    mod marker_tests {
        use super::*;

        #[test]
        fn test_empty_marker_rejected() {
            assert!(matches!(Marker::new(Vec::new()), Err(ConfigError::InvalidMarker(_))));
        }

        #[test]
        fn test_pad_preserves_length() {
            let m = marker("0123456789");
            assert_eq!(m.pad(b"abc").unwrap(), b"abc       ");
            assert_eq!(m.pad(b"0123456789").unwrap().len(), 10);
        }

        #[test]
        fn test_payload_too_long() {
            let m = marker("0123");
            assert!(matches!(
                m.pad(b"01234"),
                Err(PatchError::PayloadTooLong { payload: 5, marker: 4 })
            ));
        }

        #[test]
        fn test_default_marker_length() {
            assert_eq!(DEFAULT_MARKER.len(), 1024);
        }
    }

    mod scanner_tests {
        use super::*;

        #[test]
        fn test_marker_inside_one_chunk() {
            let m = marker("MARK");
            let mut scanner = MarkerScanner::new(&m);
            assert_eq!(scanner.feed(b"aaaa"), None);
            assert_eq!(scanner.feed(b"bbMARKbb"), Some(6));
        }

        #[test]
        fn test_marker_spanning_chunks() {
            let m = marker("MARKER");
            let mut scanner = MarkerScanner::new(&m);
            assert_eq!(scanner.feed(b"xxxxMA"), None);
            assert_eq!(scanner.feed(b"R"), None);
            assert_eq!(scanner.feed(b"KERyyy"), Some(4));
        }

        #[test]
        fn test_marker_absent() {
            let m = marker("MARKER");
            let mut scanner = MarkerScanner::new(&m);
            for chunk in [&b"MARKE"[..], b"xMARKE", b"", b"-R-no"] {
                if let Some(offset) = scanner.feed(chunk) {
                    panic!("unexpected match at {offset}");
                }
            }
        }

        #[test]
        fn test_byte_at_a_time() {
            let data = b"........MARKER....";
            let m = marker("MARKER");
            let mut scanner = MarkerScanner::new(&m);
            let found = data.iter().find_map(|b| scanner.feed(std::slice::from_ref(b)));
            assert_eq!(found, Some(8));
        }
    }

    mod overlay_tests {
        use super::*;

        #[test]
        fn test_patch_buffer() {
            let m = marker("@@@@@@@@");
            let mut data = b"head@@@@@@@@tail".to_vec();
            patch_buffer(&mut data, &m, b"new").unwrap();
            assert_eq!(data, b"headnew     tail");
        }

        #[test]
        fn test_patch_buffer_without_marker() {
            let m = marker("@@@@");
            let mut data = b"nothing here".to_vec();
            assert!(matches!(
                patch_buffer(&mut data, &m, b"x"),
                Err(PatchError::MarkerNotFound)
            ));
            assert_eq!(data, b"nothing here");
        }

        #[test]
        fn test_overlay_partial_intersections() {
            let patch = b"PPPP";
            // patch at 6..10

            let mut chunk = *b"aaaaaaaa";
            overlay(&mut chunk, 0, patch, 6);
            assert_eq!(&chunk, b"aaaaaaPP");

            let mut chunk = *b"bbbbbbbb";
            overlay(&mut chunk, 8, patch, 6);
            assert_eq!(&chunk, b"PPbbbbbb");

            let mut chunk = *b"cc";
            overlay(&mut chunk, 7, patch, 6);
            assert_eq!(&chunk, b"PP");

            let mut chunk = *b"dddd";
            overlay(&mut chunk, 20, patch, 6);
            assert_eq!(&chunk, b"dddd");
        }
    }
}
