//! Health endpoint.
//!
//! GET /healthcheck

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub revision: String,
    pub uptime: u64,
    pub backend: &'static str,
}

pub async fn handle_health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        revision: state.startup.revision.clone(),
        uptime: state.startup.started.elapsed().as_secs(),
        backend: state.backend.name(),
    })
}
