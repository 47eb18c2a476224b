//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Incident alert broadcasting (drives the client alert banner)
//! - Detection status updates (per-camera state transitions)
//!
//! Note: Only alert metadata is sent via WebSocket (id, timestamp, image
//! URLs). Actual image data is fetched via HTTP GET under /static.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A finalized incident; clients fetch images over HTTP
    IncidentAlert(IncidentAlertMessage),
    /// Per-camera detection state transition
    DetectionStatus(DetectionStatusMessage),
}

/// Incident alert message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAlertMessage {
    pub incident_id: u64,
    pub timestamp: String,
    pub location: String,
    /// URL of the representative frame under /static
    pub image_url: Option<String>,
    pub faces_detected: bool,
    pub face_urls: Vec<String>,
}

/// Detection status message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionStatusMessage {
    pub camera_id: String,
    /// "monitoring" / "warning" / "alert"
    pub state: String,
    pub smoothed_confidence: f32,
    pub timestamp: String,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let conn = ClientConnection { id, tx };

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let msg_type = match &message {
            HubMessage::IncidentAlert(_) => "incident_alert",
            HubMessage::DetectionStatus(_) => "detection_status",
        };

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        tracing::debug!(
            message_type = %msg_type,
            client_count = connections.len(),
            "Broadcasting to connected clients"
        );

        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_registered_client() {
        let hub = RealtimeHub::new();
        let (_id1, mut rx1) = hub.register().await;
        let (_id2, mut rx2) = hub.register().await;
        assert_eq!(hub.connection_count(), 2);

        hub.broadcast(HubMessage::DetectionStatus(DetectionStatusMessage {
            camera_id: "cam-1".to_string(),
            state: "warning".to_string(),
            smoothed_confidence: 0.72,
            timestamp: "2026-01-01 00:00:00".to_string(),
        }))
        .await;

        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert_eq!(m1, m2);
        assert!(m1.contains("\"type\":\"detection_status\""));
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = RealtimeHub::new();
        let (id, mut rx) = hub.register().await;
        hub.unregister(&id).await;
        assert_eq!(hub.connection_count(), 0);

        hub.broadcast(HubMessage::IncidentAlert(IncidentAlertMessage {
            incident_id: 1,
            timestamp: "2026-01-01 00:00:00".to_string(),
            location: "Lobby".to_string(),
            image_url: Some("/static/uploads/incident_1.jpg".to_string()),
            faces_detected: false,
            face_urls: vec![],
        }))
        .await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn alert_message_uses_tagged_envelope() {
        let msg = HubMessage::IncidentAlert(IncidentAlertMessage {
            incident_id: 9,
            timestamp: "2026-01-01 00:00:00".to_string(),
            location: "Yard".to_string(),
            image_url: None,
            faces_detected: true,
            face_urls: vec!["/static/uploads/faces/incident_9_face_1.jpg".to_string()],
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"incident_alert\""));
        assert!(json.contains("\"data\":"));
        assert!(json.contains("\"incident_id\":9"));
    }
}
