use std::path::PathBuf;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while decoding a DHCP datagram.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },

    #[error("unsupported hardware type {htype} (length {hlen})")]
    UnsupportedHardware { htype: u8, hlen: u8 },
}

/// Startup configuration errors. All of these are fatal before any listener binds.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field} url '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid ip cidr in trusted proxies: '{0}'")]
    InvalidTrustedProxy(String),

    #[error("only one backend can be enabled at a time")]
    MultipleBackends,

    #[error("no backend enabled: enable the file or the noop backend")]
    NoBackend,

    #[error("noop backend can only be used with --dhcp-mode=auto-proxy")]
    NoopRequiresAutoProxy,

    #[error("unable to detect a local IPv4 address for {0}; set it explicitly")]
    NoLocalAddress(&'static str),

    #[error("invalid marker: {0}")]
    InvalidMarker(String),

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("failed to load backend file {path}: {message}")]
    Backend { path: PathBuf, message: String },
}

/// Errors from a record store.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid hardware address key '{0}'")]
    InvalidKey(String),

    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from rendering an iPXE script.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// Errors from patching or streaming an image.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("marker not found in source image: not patchable")]
    MarkerNotFound,

    #[error("patch payload is {payload} bytes, longer than the {marker} byte marker")]
    PayloadTooLong { payload: usize, marker: usize },

    #[error("source image returned an unexpected response: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from a single TFTP transfer.
#[derive(Error, Debug)]
pub enum TftpError {
    #[error("malformed TFTP packet: {0}")]
    Malformed(String),

    #[error("unsupported transfer mode '{0}'")]
    UnsupportedMode(String),

    #[error("timed out waiting for ACK of block {0}")]
    Timeout(u16),

    #[error("client sent error {code}: {message}")]
    Client { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
}

/// HTTP-facing error. Converts into a response with a matching status code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Range not satisfiable for {0} byte resource")]
    RangeNotSatisfiable(u64),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Lookup(_)
            | AppError::Script(_)
            | AppError::Patch(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        if let AppError::RangeNotSatisfiable(len) = self {
            return (
                status,
                [
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CONTENT_RANGE, format!("bytes */{len}")),
                ],
            )
                .into_response();
        }

        (status, self.to_string()).into_response()
    }
}
