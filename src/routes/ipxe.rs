//! Bootloader binary endpoint.
//!
//! GET /ipxe/{file}

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::AppState;
use crate::error::{AppError, AppResult};

pub async fn handle_binary(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    let store = state
        .binaries
        .as_ref()
        .ok_or_else(|| AppError::NotFound(file.clone()))?;

    let data = store
        .read(&file)
        .await?
        .ok_or_else(|| AppError::NotFound(file.clone()))?;

    tracing::debug!(file = %file, bytes = data.len(), "serving iPXE binary");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}
