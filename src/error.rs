//! Error handling for the Vigil camserver

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// The per-frame pipeline loop converts most of these into a degraded
/// frame/state and keeps going; only `SourceUnavailable` ends a stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device/URL cannot be opened - fatal to that pipeline instance
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Transient frame read failure - substitute a placeholder frame
    #[error("Frame read failed: {0}")]
    FrameRead(String),

    /// Model inference failure - treated as confidence 0.0 by the driver
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Face detection failure - treated as an empty result
    #[error("Face detection failed: {0}")]
    FaceDetection(String),

    /// Artifact write failure - incident discarded without crashing the driver
    #[error("Artifact persist failed: {0}")]
    ArtifactPersist(String),

    /// Notification channel failure - isolated per channel
    #[error("Notification failed: {0}")]
    Notification(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::SourceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SOURCE_UNAVAILABLE",
                msg.clone(),
            ),
            Error::FrameRead(msg) => (StatusCode::BAD_GATEWAY, "FRAME_READ_ERROR", msg.clone()),
            Error::Inference(msg) => (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", msg.clone()),
            Error::FaceDetection(msg) => (
                StatusCode::BAD_GATEWAY,
                "FACE_DETECTION_ERROR",
                msg.clone(),
            ),
            Error::ArtifactPersist(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ARTIFACT_PERSIST_ERROR",
                msg.clone(),
            ),
            Error::Notification(msg) => {
                (StatusCode::BAD_GATEWAY, "NOTIFICATION_ERROR", msg.clone())
            }
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Image(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
