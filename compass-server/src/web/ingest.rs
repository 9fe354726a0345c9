//! Sensor ingest API: the client posts fixes and orientation here.
//!
//! Every handler turns its body into a navigator `Event` and queues it.
//! The response only acknowledges the queueing; results show up in the
//! next needle snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use compass_core::{OrientationReading, PositionError, PositionFix};

use crate::runtime::{now_ms, Event};
use crate::web::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FixRequest {
    lat: f64,
    lon: f64,
    accuracy_m: Option<f64>,
    timestamp_ms: Option<u64>,
}

impl FixRequest {
    fn validate(&self) -> Result<(), &'static str> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err("lat must be within [-90, 90]");
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err("lon must be within [-180, 180]");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn queue(state: &AppState, event: Event) -> (StatusCode, Json<Value>) {
    if state.navigator.send(event).await {
        (StatusCode::ACCEPTED, Json(json!({"queued": true})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "navigator stopped"})),
        )
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/fix: one position fix.
pub async fn api_fix(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FixRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(msg) = body.validate() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": msg})));
    }

    let mut fix = PositionFix::new(body.lat, body.lon, body.timestamp_ms.unwrap_or_else(now_ms));
    fix.accuracy_m = body.accuracy_m;
    queue(&state, Event::FixArrived(fix)).await
}

/// POST /api/v1/fix/error: position source failure.
pub async fn api_fix_error(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PositionError>,
) -> (StatusCode, Json<Value>) {
    queue(&state, Event::PositionFailed(body)).await
}

/// POST /api/v1/orientation: compass heading, raw rotation, or `{}`.
pub async fn api_orientation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OrientationReading>,
) -> (StatusCode, Json<Value>) {
    if let Some(h) = body.heading() {
        if !h.is_finite() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "heading must be finite"})),
            );
        }
    }
    queue(&state, Event::OrientationChanged(body)).await
}

/// POST /api/v1/recenter: force a re-locate.
pub async fn api_recenter(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    queue(&state, Event::Recenter).await
}
