//! HTTP route handlers.

pub mod health;
pub mod ipxe;
pub mod iso;
pub mod script;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use ipnetwork::IpNetwork;

use crate::backend::BootRecordLookup;
use crate::ipxe::{BinaryStore, ScriptComposer};
use crate::iso::{PatchedImage, PayloadSettings};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Build revision and process start, reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct StartupInfo {
    pub revision: String,
    pub started: Instant,
}

impl StartupInfo {
    pub fn now(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            started: Instant::now(),
        }
    }
}

/// Patched installer image and the settings its payload is built from.
#[derive(Debug)]
pub struct IsoState {
    pub image: PatchedImage,
    pub payload: PayloadSettings,
}

/// Shared handler state. Disabled features are `None`.
#[derive(Debug, Clone)]
pub struct AppState {
    pub backend: Arc<dyn BootRecordLookup>,
    pub lookup_timeout: Duration,
    pub script: Option<Arc<ScriptComposer>>,
    pub binaries: Option<Arc<BinaryStore>>,
    pub iso: Option<Arc<IsoState>>,
    pub trusted_proxies: Arc<Vec<IpNetwork>>,
    pub startup: StartupInfo,
}

/// Client address for a request. `X-Forwarded-For` is honored only when the
/// direct peer is a trusted proxy; the list is walked from the right and the
/// first untrusted hop wins.
pub fn client_ip(peer: IpAddr, headers: &HeaderMap, trusted: &[IpNetwork]) -> IpAddr {
    let is_trusted = |ip: &IpAddr| trusted.iter().any(|net| net.contains(*ip));
    if !is_trusted(&peer) {
        return peer;
    }

    let hops: Vec<IpAddr> = headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();

    let mut client = peer;
    for hop in hops.into_iter().rev() {
        client = hop;
        if !is_trusted(&hop) {
            break;
        }
    }
    client
}

/// HTTP request logging middleware.
async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(state): axum::extract::State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = client_ip(addr.ip(), request.headers(), &state.trusted_proxies);
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        client = %client,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http request"
    );

    response
}

/// Create the application router. Routes for disabled features are left out.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/healthcheck", get(health::handle_health));

    if state.binaries.is_some() {
        router = router.route("/ipxe/{*file}", get(ipxe::handle_binary));
    }
    if state.iso.is_some() {
        router = router.route("/iso/{mac}/{*file}", get(iso::handle_iso));
    }
    if state.script.is_some() {
        router = router.fallback(script::handle_script);
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), request_logging))
        .with_state(state)
}
