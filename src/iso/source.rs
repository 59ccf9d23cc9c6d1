//! Where image bytes come from: a local file or a remote HTTP(S) URL.

use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::error::PatchError;

const READ_CHUNK: usize = 64 * 1024;

pub type ByteStream = BoxStream<'static, Result<Bytes, PatchError>>;

/// Read-only random access to an image. Every call to `read_range` owns
/// its own cursor, so concurrent readers never interfere.
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync + std::fmt::Debug {
    /// Total size in bytes.
    async fn len(&self) -> Result<u64, PatchError>;

    /// Stream `len` bytes starting at `start`.
    async fn read_range(&self, start: u64, len: u64) -> Result<ByteStream, PatchError>;
}

/// Build a source from `file://`, `http://` or `https://` locations. A bare
/// path is treated as a local file.
pub fn source_from_location(location: &str) -> Result<Box<dyn ImageSource>, PatchError> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| PatchError::Source(format!("invalid file url '{location}'")))?;
            Ok(Box::new(FileSource::new(path)))
        }
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Box::new(HttpSource::new(url)?)),
        Ok(url) => Err(PatchError::Source(format!(
            "unsupported image scheme '{}'",
            url.scheme()
        ))),
        Err(_) => Ok(Box::new(FileSource::new(PathBuf::from(location)))),
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ImageSource for FileSource {
    async fn len(&self) -> Result<u64, PatchError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    async fn read_range(&self, start: u64, len: u64) -> Result<ByteStream, PatchError> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let reader = file.take(len);
        Ok(ReaderStream::with_capacity(reader, READ_CHUNK)
            .map_err(PatchError::from)
            .boxed())
    }
}

#[derive(Debug)]
pub struct HttpSource {
    url: Url,
    client: reqwest::Client,
    len: OnceCell<u64>,
}

impl HttpSource {
    pub fn new(url: Url) -> Result<Self, PatchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            url,
            client,
            len: OnceCell::new(),
        })
    }

    async fn fetch_len(&self) -> Result<u64, PatchError> {
        let response = self.client.head(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(PatchError::Source(format!(
                "HEAD {} returned {}",
                self.url,
                response.status()
            )));
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| PatchError::Source(format!("HEAD {} has no content length", self.url)))
    }
}

#[async_trait::async_trait]
impl ImageSource for HttpSource {
    async fn len(&self) -> Result<u64, PatchError> {
        self.len.get_or_try_init(|| self.fetch_len()).await.copied()
    }

    async fn read_range(&self, start: u64, len: u64) -> Result<ByteStream, PatchError> {
        if len == 0 {
            return Ok(stream::empty().boxed());
        }
        let range = format!("bytes={}-{}", start, start + len - 1);
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, range)
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if start == 0 => {}
            status => {
                return Err(PatchError::Source(format!(
                    "GET {} for bytes {start}+{len} returned {status}",
                    self.url
                )))
            }
        }

        // A full-body answer to a range request starting at zero is cut to length.
        Ok(response
            .bytes_stream()
            .map_err(PatchError::from)
            .scan(len, |remaining, item| {
                let next = match item {
                    Ok(_) if *remaining == 0 => None,
                    Ok(mut chunk) => {
                        if chunk.len() as u64 > *remaining {
                            chunk.truncate(*remaining as usize);
                        }
                        *remaining -= chunk.len() as u64;
                        Some(Ok(chunk))
                    }
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(next)
            })
            .boxed())
    }
}

/// Collect a byte stream into one buffer.
pub async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, PatchError> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
