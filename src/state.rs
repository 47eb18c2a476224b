//! Application state
//!
//! Holds all shared components and state

use crate::artifact_store::ArtifactStore;
use crate::frame_source::SourceManager;
use crate::incident_log::IncidentLog;
use crate::model_client::ModelClient;
use crate::notifier::email::EmailConfig;
use crate::notifier::NotificationDispatcher;
use crate::pipeline::Pipeline;
use crate::realtime_hub::RealtimeHub;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One configured camera
#[derive(Debug, Clone)]
pub struct CameraSpec {
    pub id: String,
    pub source_url: String,
    pub location: String,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Violence/face model server URL
    pub model_server_url: String,
    /// Artifact directory (uploads/ tree, served under /static)
    pub data_dir: PathBuf,
    /// Configured cameras
    pub cameras: Vec<CameraSpec>,
    /// Capture width in pixels
    pub frame_width: u32,
    /// Capture height in pixels
    pub frame_height: u32,
    /// Sampling interval between processed frames
    pub sample_interval: Duration,
    /// SMTP delivery settings
    pub email: EmailConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            model_server_url: std::env::var("MODEL_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/vigil")),
            cameras: std::env::var("CAMERA_SOURCES")
                .map(|v| parse_cameras(&v))
                .unwrap_or_else(|_| {
                    vec![CameraSpec {
                        id: "webcam".to_string(),
                        source_url: "/dev/video0".to_string(),
                        location: "Default".to_string(),
                    }]
                }),
            frame_width: std::env::var("FRAME_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(640),
            frame_height: std::env::var("FRAME_HEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(480),
            sample_interval: Duration::from_millis(
                std::env::var("SAMPLE_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            ),
            email: EmailConfig {
                smtp_server: std::env::var("SMTP_SERVER").unwrap_or_default(),
                smtp_port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(587),
                sender: std::env::var("EMAIL_SENDER").unwrap_or_default(),
                password: std::env::var("EMAIL_PASSWORD").unwrap_or_default(),
                recipients: std::env::var("EMAIL_RECIPIENTS")
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        }
    }
}

impl AppConfig {
    /// Look up a configured camera by id
    pub fn camera(&self, id: &str) -> Option<&CameraSpec> {
        self.cameras.iter().find(|c| c.id == id)
    }
}

/// Parse `CAMERA_SOURCES`: `id|url|location` entries separated by `;`.
/// Malformed entries are skipped with a warning.
fn parse_cameras(value: &str) -> Vec<CameraSpec> {
    value
        .split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, '|');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(url), Some(location)) if !id.is_empty() && !url.is_empty() => {
                    Some(CameraSpec {
                        id: id.to_string(),
                        source_url: url.to_string(),
                        location: location.to_string(),
                    })
                }
                _ => {
                    tracing::warn!(entry = %entry, "Skipping malformed CAMERA_SOURCES entry");
                    None
                }
            }
        })
        .collect()
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// SourceManager (camera acquisition)
    pub sources: Arc<SourceManager>,
    /// ModelClient (violence/face model adapter)
    pub model: Arc<ModelClient>,
    /// IncidentLog (finalized incident ring buffer)
    pub incident_log: Arc<IncidentLog>,
    /// NotificationDispatcher (email fan-out)
    pub dispatcher: Arc<NotificationDispatcher>,
    /// RealtimeHub (WebSocket)
    pub hub: Arc<RealtimeHub>,
    /// ArtifactStore (incident images)
    pub artifacts: Arc<ArtifactStore>,
    /// Pipeline (per-camera detection)
    pub pipeline: Arc<Pipeline>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_sources_parse_pipe_separated_entries() {
        let cameras =
            parse_cameras("front|rtsp://10.0.0.2/stream|Front Gate;yard|/dev/video1|Back Yard");
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].id, "front");
        assert_eq!(cameras[0].source_url, "rtsp://10.0.0.2/stream");
        assert_eq!(cameras[0].location, "Front Gate");
        assert_eq!(cameras[1].location, "Back Yard");
    }

    #[test]
    fn malformed_camera_entries_are_skipped() {
        let cameras = parse_cameras("good|rtsp://cam/1|Lobby;missing-fields;|no-id|X");
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].id, "good");
    }
}
