//! Email delivery channel (SMTP via STARTTLS).
//!
//! Unconfigured deployments get a no-op channel that reports every
//! dispatch as skipped; the rest of the pipeline is unaffected.

use super::{ChannelState, DeliveryOutcome, Notification, NotificationChannel};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::PathBuf;
use std::time::Duration;

const EMAIL_COOLDOWN: Duration = Duration::from_secs(300);

/// SMTP settings, all sourced from the environment
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    pub recipients: Vec<String>,
}

impl EmailConfig {
    /// Delivery needs a server, credentials and at least one recipient
    pub fn is_configured(&self) -> bool {
        !self.smtp_server.is_empty()
            && !self.sender.is_empty()
            && !self.password.is_empty()
            && !self.recipients.is_empty()
    }
}

/// EmailChannel instance
pub struct EmailChannel {
    config: EmailConfig,
    state: ChannelState,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    /// Base directory the notification's relative artifact paths hang off
    artifacts_base: PathBuf,
}

impl EmailChannel {
    /// Create new email channel; unconfigured settings yield a no-op.
    pub fn new(config: EmailConfig, artifacts_base: PathBuf) -> Self {
        let transport = if config.is_configured() {
            match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server) {
                Ok(builder) => Some(
                    builder
                        .port(config.smtp_port)
                        .credentials(Credentials::new(
                            config.sender.clone(),
                            config.password.clone(),
                        ))
                        .build(),
                ),
                Err(e) => {
                    tracing::warn!(
                        server = %config.smtp_server,
                        error = %e,
                        "Failed to build SMTP transport, email disabled"
                    );
                    None
                }
            }
        } else {
            tracing::info!("Email notifications not configured");
            None
        };

        Self {
            config,
            state: ChannelState::new(EMAIL_COOLDOWN),
            transport,
            artifacts_base,
        }
    }

    /// Assemble the MIME message: plain-text alternative plus an HTML
    /// part with inline JPEG bodies. Missing artifact files are skipped.
    async fn build_message(&self, notification: &Notification) -> Result<Message, String> {
        let from: Mailbox = self
            .config
            .sender
            .parse()
            .map_err(|e| format!("invalid sender address: {}", e))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(notification.subject.clone());
        for recipient in &self.config.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| format!("invalid recipient address: {}", e))?;
            builder = builder.to(to);
        }

        let mut related = MultiPart::related().singlepart(SinglePart::html(notification.html_body()));

        if let Some(rel) = &notification.image_path {
            if let Some(body) = self.read_artifact(rel).await {
                related = related.singlepart(
                    Attachment::new_inline("incident_image".to_string())
                        .body(body, ContentType::parse("image/jpeg").unwrap()),
                );
            }
        }

        for (i, rel) in notification.face_paths.iter().enumerate() {
            if let Some(body) = self.read_artifact(rel).await {
                related = related.singlepart(
                    Attachment::new_inline(format!("face_{}", i + 1))
                        .body(body, ContentType::parse("image/jpeg").unwrap()),
                );
            }
        }

        builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(notification.plain_body()))
                    .multipart(related),
            )
            .map_err(|e| format!("failed to build message: {}", e))
    }

    async fn read_artifact(&self, rel: &str) -> Option<Vec<u8>> {
        let path = self.artifacts_base.join(rel);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Could not read artifact for email, omitting"
                );
                None
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn dispatch(&self, notification: &Notification) -> DeliveryOutcome {
        let transport = match &self.transport {
            Some(t) => t,
            None => return DeliveryOutcome::Skipped("email not configured".to_string()),
        };

        if !self.state.ready().await {
            return DeliveryOutcome::Skipped("cooldown active".to_string());
        }

        let message = match self.build_message(notification).await {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::Failed(e),
        };

        match transport.send(message).await {
            Ok(_) => {
                self.state.mark_sent().await;
                DeliveryOutcome::Sent
            }
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification {
            incident_id: 1,
            subject: "VIOLENCE ALERT - Lobby - 2026-01-01 00:00:00".to_string(),
            location: "Lobby".to_string(),
            timestamp: "2026-01-01 00:00:00".to_string(),
            image_path: Some("uploads/incident_1.jpg".to_string()),
            face_paths: vec![],
            faces_detected: false,
        }
    }

    #[test]
    fn unconfigured_settings_are_detected() {
        assert!(!EmailConfig::default().is_configured());

        let config = EmailConfig {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            sender: "alerts@example.com".to_string(),
            password: "secret".to_string(),
            recipients: vec!["ops@example.com".to_string()],
        };
        assert!(config.is_configured());
    }

    #[tokio::test]
    async fn unconfigured_channel_skips_dispatch() {
        let channel = EmailChannel::new(EmailConfig::default(), PathBuf::from("/tmp"));
        let outcome = channel.dispatch(&notification()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Skipped("email not configured".to_string())
        );
    }

    #[tokio::test]
    async fn message_builds_even_when_artifacts_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmailConfig {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            sender: "alerts@example.com".to_string(),
            password: "secret".to_string(),
            recipients: vec!["ops@example.com".to_string()],
        };
        let channel = EmailChannel::new(config, dir.path().to_path_buf());

        // Artifact file does not exist; the inline part is omitted but
        // the message itself still builds.
        let message = channel.build_message(&notification()).await.unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("VIOLENCE ALERT - Lobby"));
    }
}
