//! Web server: axum API between the phone/browser front end and the navigator.
//!
//! The front end posts position fixes and orientation readings; it reads
//! back the needle snapshot. All handlers talk to the navigator through its
//! handle, never to the engine directly.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use compass_core::config::PositionConfig;

use crate::runtime::NavigatorHandle;

pub mod ingest;
pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub navigator: NavigatorHandle,
    pub position: PositionConfig,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/needle", axum::routing::get(routes::api_needle))
        .route(
            "/api/v1/position-settings",
            axum::routing::get(routes::api_position_settings),
        )
        // Ingest API (sensor events from the client)
        .route("/api/v1/fix", axum::routing::post(ingest::api_fix))
        .route("/api/v1/fix/error", axum::routing::post(ingest::api_fix_error))
        .route(
            "/api/v1/orientation",
            axum::routing::post(ingest::api_orientation),
        )
        .route("/api/v1/recenter", axum::routing::post(ingest::api_recenter))
        .with_state(state)
        .layer(cors)
}

/// Start the web server.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(Arc::new(state));
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("compass server listening on http://{addr}");
    axum::serve(listener, app).await
}
