//! Boot script endpoint.
//!
//! GET [/prefix][/{mac}]/auto.ipxe
//!
//! The hardware address in the path is used when present. Otherwise the
//! client is found by its source address.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use macaddr::MacAddr6;

use super::{client_ip, AppState};
use crate::backend::{lookup_by_ip_with_timeout, lookup_with_timeout};
use crate::error::{AppError, AppResult};

const SCRIPT_NAME: &str = "auto.ipxe";

/// Split a request path into the optional hardware address segment. Returns
/// `None` when the path does not name the boot script.
fn parse_script_path(path: &str) -> Option<Option<MacAddr6>> {
    let mut segments = path.trim_matches('/').rsplit('/');
    if segments.next()? != SCRIPT_NAME {
        return None;
    }
    Some(segments.next().and_then(|s| MacAddr6::from_str(s).ok()))
}

pub async fn handle_script(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> AppResult<Response> {
    let composer = state
        .script
        .as_ref()
        .ok_or_else(|| AppError::NotFound(uri.path().to_string()))?;
    let path_mac =
        parse_script_path(uri.path()).ok_or_else(|| AppError::NotFound(uri.path().to_string()))?;

    if composer.is_static() {
        let script = composer.compose(path_mac.as_ref(), None)?;
        return Ok(script_response(script));
    }

    let found = match path_mac {
        Some(mac) => lookup_with_timeout(state.backend.as_ref(), mac, state.lookup_timeout)
            .await?
            .map(|record| (mac, record)),
        None => {
            let ip = client_ip(peer.ip(), &headers, &state.trusted_proxies);
            lookup_by_ip_with_timeout(state.backend.as_ref(), ip, state.lookup_timeout).await?
        }
    };

    let Some((mac, record)) = found else {
        return Err(AppError::NotFound(format!("no boot record for {}", uri.path())));
    };
    if !record.allows_netboot() {
        return Err(AppError::NotFound(format!("netboot not allowed for {mac}")));
    }

    tracing::info!(mac = %mac, "serving boot script");
    let script = composer.compose(Some(&mac), Some(&record))?;
    Ok(script_response(script))
}

fn script_response(script: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        script,
    )
        .into_response()
}
