//! API Routes

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::Error;
use crate::models::ApiResponse;
use crate::pipeline::placeholder_part;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::detection_status))
        // Streaming
        .route("/video_feed", get(video_feed))
        // Incidents
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/export.csv", get(export_incidents_csv))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Streaming
// ========================================

#[derive(Debug, Deserialize)]
struct VideoFeedParams {
    camera_id: Option<String>,
}

const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// MJPEG video feed for one camera. Drives the detection pipeline for
/// every frame it streams.
async fn video_feed(
    State(state): State<AppState>,
    Query(params): Query<VideoFeedParams>,
) -> Response {
    let camera_id = params
        .camera_id
        .or_else(|| state.config.cameras.first().map(|c| c.id.clone()))
        .unwrap_or_default();

    let spec = match state.config.camera(&camera_id) {
        Some(spec) => spec.clone(),
        None => {
            return Error::NotFound(format!("camera '{}' not configured", camera_id))
                .into_response()
        }
    };

    let (width, height) = (state.config.frame_width, state.config.frame_height);

    let source = match state
        .sources
        .get_or_start(&spec.id, &spec.source_url, width, height)
        .await
    {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(camera_id = %spec.id, error = %e, "Camera failed to open");
            // One captioned placeholder so the client shows the failure,
            // then the stream ends.
            let part = placeholder_part(width, height, "CAMERA UNAVAILABLE");
            let body = Body::from_stream(futures::stream::iter(vec![Ok::<_, std::convert::Infallible>(part)]));
            return mjpeg_response(body);
        }
    };

    let cam = state.pipeline.camera(&spec.id, &spec.location).await;
    let stream = state.pipeline.clone().mjpeg_stream(
        source,
        cam,
        width,
        height,
        state.config.sample_interval,
    );

    mjpeg_response(Body::from_stream(stream))
}

fn mjpeg_response(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| Error::Internal("failed to build stream response".into()).into_response())
}

// ========================================
// Incident Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let incidents = state
        .incident_log
        .get_latest(params.limit.unwrap_or(50))
        .await;
    Json(ApiResponse::success(incidents))
}

async fn export_incidents_csv(State(state): State<AppState>) -> impl IntoResponse {
    let csv = state.incident_log.to_csv().await;
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"incidents.csv\"",
            ),
        ],
        csv,
    )
}

// ========================================
// Notification Handlers
// ========================================

async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let records = state.dispatcher.history(params.limit.unwrap_or(50)).await;
    Json(ApiResponse::success(records))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register with RealtimeHub
    let (conn_id, mut rx) = state.hub.register().await;

    // Forward hub broadcasts to this client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming messages until the client goes away
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    // Wait for either task to complete
    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    // Unregister from hub
    state.hub.unregister(&conn_id).await;
}
