//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - MJPEG video feed
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::{HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let model_ok = state.model.health_check().await.unwrap_or(false);

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_server_connected: model_ok,
        active_sources: state.sources.count().await,
        ws_clients: state.hub.connection_count(),
    };

    Json(response)
}

/// Detection status endpoint
pub async fn detection_status(State(state): State<AppState>) -> impl IntoResponse {
    let response = StatusResponse {
        status: state.pipeline.overall_state().await.as_str().to_string(),
        last_incident: state.incident_log.last_timestamp().await,
        alert_count: state.incident_log.count().await,
    };

    Json(response)
}
