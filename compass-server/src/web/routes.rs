//! Read-side API route handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use compass_core::config::PositionConfig;
use compass_core::Snapshot;

use crate::web::AppState;

/// GET /api/v1/needle: latest engine snapshot (needle, distance, status).
pub async fn api_needle(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.navigator.snapshot())
}

/// GET /api/v1/position-settings: options for the client's position watch.
pub async fn api_position_settings(State(state): State<Arc<AppState>>) -> Json<PositionConfig> {
    Json(state.position.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
