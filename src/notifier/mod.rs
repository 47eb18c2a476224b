//! Notifier - Incident Notification Dispatch
//!
//! ## Responsibilities
//!
//! - Build notification content from finalized incidents
//! - Fan out to delivery channels off the pipeline's hot path
//! - Per-channel cooldown bookkeeping
//! - Bounded delivery history for the reporting surface
//!
//! Dispatch runs on a dedicated worker task fed by a bounded queue so a
//! slow SMTP server can never stall frame processing.

pub mod email;

pub use email::EmailChannel;

use crate::incident_recorder::Incident;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};

const QUEUE_DEPTH: usize = 32;
const HISTORY_CAPACITY: usize = 100;

/// Notification content, channel-independent.
#[derive(Debug, Clone)]
pub struct Notification {
    pub incident_id: u64,
    pub subject: String,
    pub location: String,
    pub timestamp: String,
    pub image_path: Option<String>,
    pub face_paths: Vec<String>,
    pub faces_detected: bool,
}

impl Notification {
    pub fn from_incident(incident: &Incident) -> Self {
        Self {
            incident_id: incident.id,
            subject: format!(
                "VIOLENCE ALERT - {} - {}",
                incident.location, incident.timestamp
            ),
            location: incident.location.clone(),
            timestamp: incident.timestamp.clone(),
            image_path: incident.image_path.clone(),
            face_paths: incident.face_paths(),
            faces_detected: incident.faces_detected,
        }
    }

    pub fn plain_body(&self) -> String {
        format!(
            "Violence detected.\n\n\
             Incident ID: {}\n\
             Time: {}\n\
             Location: {}\n\
             Faces detected: {}\n",
            self.incident_id,
            self.timestamp,
            self.location,
            if self.faces_detected { "Yes" } else { "No" }
        )
    }

    /// HTML body referencing inline images by content id. The channel
    /// attaches `cid:incident_image` and `cid:face_{n}` bodies.
    pub fn html_body(&self) -> String {
        let mut html = format!(
            "<html><body>\
             <h2>Violence Alert</h2>\
             <p><b>Incident ID:</b> {}</p>\
             <p><b>Time:</b> {}</p>\
             <p><b>Location:</b> {}</p>",
            self.incident_id, self.timestamp, self.location
        );

        if self.image_path.is_some() {
            html.push_str("<h3>Incident Frame</h3><img src=\"cid:incident_image\" width=\"480\">");
        }

        if !self.face_paths.is_empty() {
            html.push_str("<h3>Detected Faces</h3>");
            for i in 1..=self.face_paths.len() {
                html.push_str(&format!("<img src=\"cid:face_{}\" width=\"120\"> ", i));
            }
        }

        html.push_str("</body></html>");
        html
    }
}

/// Result of one channel dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

/// Delivery channel contract. Channels own their cooldown policy and
/// never return errors; failures are reported as outcomes so one bad
/// channel cannot abort the fan-out.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn dispatch(&self, notification: &Notification) -> DeliveryOutcome;
}

/// Per-channel cooldown clock
pub struct ChannelState {
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ChannelState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(None),
        }
    }

    /// True when the cooldown since the last successful send has passed
    pub async fn ready(&self) -> bool {
        self.ready_at(Instant::now()).await
    }

    pub async fn ready_at(&self, now: Instant) -> bool {
        let last = self.last_sent.lock().await;
        match *last {
            Some(at) => now.duration_since(at) >= self.cooldown,
            None => true,
        }
    }

    /// Record a successful send; skipped and failed attempts do not
    /// advance the clock.
    pub async fn mark_sent(&self) {
        self.mark_sent_at(Instant::now()).await;
    }

    pub async fn mark_sent_at(&self, now: Instant) {
        let mut last = self.last_sent.lock().await;
        *last = Some(now);
    }
}

/// One dispatch attempt, kept in the history ring.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub incident_id: u64,
    pub subject: String,
    pub channel: String,
    pub sent: bool,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// NotificationDispatcher instance
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    history: RwLock<VecDeque<NotificationRecord>>,
    tx: mpsc::Sender<Notification>,
    rx: Mutex<Option<mpsc::Receiver<Notification>>>,
}

impl NotificationDispatcher {
    /// Create new dispatcher over a fixed set of channels
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Arc::new(Self {
            channels,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Spawn the worker task that drains the queue. Call once at startup.
    pub async fn start(self: &Arc<Self>) {
        let mut rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::warn!("Notification worker already started");
                return;
            }
        };

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("Notification worker started");
            while let Some(notification) = rx.recv().await {
                dispatcher.dispatch_now(&notification).await;
            }
            tracing::info!("Notification worker stopped");
        });
    }

    /// Enqueue a notification. A full queue drops the notification with
    /// a warning rather than blocking the caller.
    pub fn send(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            tracing::warn!(error = %e, "Notification queue full, dropping");
        }
    }

    /// Fan out to every channel and record each outcome.
    pub async fn dispatch_now(&self, notification: &Notification) {
        for channel in &self.channels {
            let outcome = channel.dispatch(notification).await;
            let (sent, detail) = match &outcome {
                DeliveryOutcome::Sent => {
                    tracing::info!(
                        incident_id = notification.incident_id,
                        channel = channel.name(),
                        "Notification sent"
                    );
                    (true, "sent".to_string())
                }
                DeliveryOutcome::Skipped(reason) => {
                    tracing::debug!(
                        incident_id = notification.incident_id,
                        channel = channel.name(),
                        reason = %reason,
                        "Notification skipped"
                    );
                    (false, reason.clone())
                }
                DeliveryOutcome::Failed(reason) => {
                    tracing::error!(
                        incident_id = notification.incident_id,
                        channel = channel.name(),
                        error = %reason,
                        "Notification failed"
                    );
                    (false, reason.clone())
                }
            };

            self.record(NotificationRecord {
                incident_id: notification.incident_id,
                subject: notification.subject.clone(),
                channel: channel.name().to_string(),
                sent,
                detail,
                recorded_at: Utc::now(),
            })
            .await;
        }
    }

    async fn record(&self, record: NotificationRecord) {
        let mut history = self.history.write().await;
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Latest records, newest first
    pub async fn history(&self, count: usize) -> Vec<NotificationRecord> {
        let history = self.history.read().await;
        history.iter().rev().take(count).cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}
