//! Installer image endpoint.
//!
//! GET|HEAD /iso/{mac}/{file}
//! Streams the installer image with the client's kernel command line
//! written over the marker. Single byte ranges are supported.

use std::str::FromStr;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use http_range::{HttpRange, HttpRangeParseError};
use macaddr::MacAddr6;

use super::AppState;
use crate::backend::lookup_with_timeout;
use crate::error::{AppError, AppResult};

/// Resolve the `Range` header against a resource of `total` bytes. `None`
/// means the whole resource.
fn requested_range(headers: &HeaderMap, total: u64) -> AppResult<Option<HttpRange>> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::BadRequest("range header is not ascii".into()))?;

    match HttpRange::parse(value, total) {
        Ok(ranges) if ranges.len() == 1 && ranges[0].length > 0 => Ok(Some(ranges[0])),
        Ok(ranges) if ranges.len() > 1 => Err(AppError::BadRequest(
            "multiple ranges are not supported".into(),
        )),
        Ok(_) | Err(HttpRangeParseError::NoOverlap) => Err(AppError::RangeNotSatisfiable(total)),
        Err(HttpRangeParseError::InvalidRange) => {
            Err(AppError::BadRequest(format!("invalid range '{value}'")))
        }
    }
}

pub async fn handle_iso(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path((mac, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let iso = state
        .iso
        .as_ref()
        .ok_or_else(|| AppError::NotFound(file.clone()))?;
    let mac = MacAddr6::from_str(&mac)
        .map_err(|_| AppError::BadRequest(format!("invalid hardware address '{mac}'")))?;

    let record = lookup_with_timeout(state.backend.as_ref(), mac, state.lookup_timeout)
        .await?
        .filter(|r| r.allows_netboot())
        .ok_or_else(|| AppError::NotFound(format!("no boot record for {mac}")))?;

    // HEAD must fail the same way GET would.
    let payload = iso.payload.build(&mac, &record);
    iso.image.marker().pad(payload.as_bytes())?;
    iso.image.marker_offset().await?;

    let total = iso.image.len().await?;
    let range = requested_range(&headers, total)?;
    let (start, len) = range.map_or((0, total), |r| (r.start, r.length));

    let mut builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len);
    builder = match range {
        Some(r) => builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", r.start, r.start + r.length - 1, total),
        ),
        None => builder.status(StatusCode::OK),
    };

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        tracing::info!(mac = %mac, file = %file, start, len, "streaming patched image");
        Body::from_stream(iso.image.stream(payload.as_bytes(), start, len).await?)
    };

    builder
        .body(body)
        .map_err(|e| AppError::Io(std::io::Error::other(e)))
}
