//! Pipeline - Per-Camera Detection Loop and MJPEG Streaming
//!
//! ## Responsibilities
//!
//! - Drive frame → classification → state machine → recorder per camera
//! - Fan out finalized incidents to log, dispatcher and realtime hub
//! - MJPEG stream generation with placeholder substitution
//!
//! In-loop failures degrade (score errors count as non-violent, persist
//! errors drop the incident); nothing here propagates an error into the
//! streaming loop.

use crate::artifact_store::ArtifactStore;
use crate::detector::{DetectionOutput, DetectionState, DetectionStateMachine};
use crate::frame_source::{placeholder_frame, Frame, FrameSource};
use crate::incident_log::IncidentLog;
use crate::incident_recorder::{Incident, IncidentRecorder};
use crate::model_client::{Classifier, FaceDetector};
use crate::notifier::{Notification, NotificationDispatcher};
use crate::realtime_hub::{
    DetectionStatusMessage, HubMessage, IncidentAlertMessage, RealtimeHub,
};
use async_stream::stream;
use bytes::Bytes;
use chrono::Local;
use futures::Stream;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Consecutive missed polls before the stream substitutes placeholders
const MISSES_BEFORE_PLACEHOLDER: u32 = 10;

/// Per-camera detection state: one state machine and one recorder,
/// driven strictly in frame order under the camera's lock.
pub struct CameraPipeline {
    pub camera_id: String,
    pub location: String,
    machine: DetectionStateMachine,
    recorder: IncidentRecorder,
    last_state: DetectionState,
}

/// Pipeline instance - shared services behind `Arc`, cameras on demand
pub struct Pipeline {
    classifier: Arc<dyn Classifier>,
    face_detector: Arc<dyn FaceDetector>,
    artifacts: Arc<ArtifactStore>,
    incident_log: Arc<IncidentLog>,
    dispatcher: Arc<NotificationDispatcher>,
    hub: Arc<RealtimeHub>,
    cameras: RwLock<HashMap<String, Arc<Mutex<CameraPipeline>>>>,
}

impl Pipeline {
    /// Create new Pipeline
    pub fn new(
        classifier: Arc<dyn Classifier>,
        face_detector: Arc<dyn FaceDetector>,
        artifacts: Arc<ArtifactStore>,
        incident_log: Arc<IncidentLog>,
        dispatcher: Arc<NotificationDispatcher>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            classifier,
            face_detector,
            artifacts,
            incident_log,
            dispatcher,
            hub,
            cameras: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the detection state for a camera.
    pub async fn camera(&self, camera_id: &str, location: &str) -> Arc<Mutex<CameraPipeline>> {
        {
            let cameras = self.cameras.read().await;
            if let Some(cam) = cameras.get(camera_id) {
                return cam.clone();
            }
        }

        let mut cameras = self.cameras.write().await;
        cameras
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                tracing::info!(camera_id = %camera_id, location = %location, "Camera pipeline created");
                Arc::new(Mutex::new(CameraPipeline {
                    camera_id: camera_id.to_string(),
                    location: location.to_string(),
                    machine: DetectionStateMachine::with_defaults(),
                    recorder: IncidentRecorder::new(
                        location.to_string(),
                        self.incident_log.clone(),
                    ),
                    last_state: DetectionState::Monitoring,
                }))
            })
            .clone()
    }

    /// Highest detection state across all cameras, for the status surface.
    pub async fn overall_state(&self) -> DetectionState {
        let cameras = self.cameras.read().await;
        let mut overall = DetectionState::Monitoring;
        for cam in cameras.values() {
            let cam = cam.lock().await;
            overall = match (overall, cam.last_state) {
                (_, DetectionState::Alert) | (DetectionState::Alert, _) => DetectionState::Alert,
                (_, DetectionState::Warning) | (DetectionState::Warning, _) => {
                    DetectionState::Warning
                }
                _ => DetectionState::Monitoring,
            };
        }
        overall
    }

    /// Run one frame through the camera's detection chain.
    pub async fn process_frame(&self, cam: &mut CameraPipeline, frame: &Frame) -> DetectionOutput {
        let raw = match self.classifier.score(frame).await {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(
                    camera_id = %cam.camera_id,
                    error = %e,
                    "Classification failed, treating frame as non-violent"
                );
                0.0
            }
        };

        let output = cam.machine.observe(raw);

        if output.state != cam.last_state {
            tracing::info!(
                camera_id = %cam.camera_id,
                from = cam.last_state.as_str(),
                to = output.state.as_str(),
                smoothed = output.smoothed,
                "Detection state changed"
            );
            cam.last_state = output.state;
            self.hub
                .broadcast(HubMessage::DetectionStatus(DetectionStatusMessage {
                    camera_id: cam.camera_id.clone(),
                    state: output.state.as_str().to_string(),
                    smoothed_confidence: output.smoothed,
                    timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                }))
                .await;
        }

        let finalized = cam
            .recorder
            .observe(
                output.incident_signal,
                frame,
                self.face_detector.as_ref(),
                &self.artifacts,
            )
            .await;

        if let Some(incident) = finalized {
            self.finish_incident(incident).await;
        }

        output
    }

    /// Record, notify and broadcast a finalized incident.
    async fn finish_incident(&self, incident: Incident) {
        let notification = Notification::from_incident(&incident);
        let alert = HubMessage::IncidentAlert(IncidentAlertMessage {
            incident_id: incident.id,
            timestamp: incident.timestamp.clone(),
            location: incident.location.clone(),
            image_url: incident.image_path.as_ref().map(|p| format!("/static/{}", p)),
            faces_detected: incident.faces_detected,
            face_urls: incident
                .face_paths()
                .iter()
                .map(|p| format!("/static/{}", p))
                .collect(),
        });

        self.incident_log.push(incident).await;
        self.dispatcher.send(notification);
        self.hub.broadcast(alert).await;
    }

    /// MJPEG stream for one camera, driving detection as a side effect.
    ///
    /// Polls the source at the sampling interval. After repeated empty
    /// polls the stream substitutes captioned placeholder frames so the
    /// client connection stays alive through camera dropouts.
    pub fn mjpeg_stream(
        self: Arc<Self>,
        source: Arc<FrameSource>,
        cam: Arc<Mutex<CameraPipeline>>,
        width: u32,
        height: u32,
        interval: Duration,
    ) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> {
        stream! {
            let mut ticker = tokio::time::interval(interval);
            let mut misses: u32 = 0;

            loop {
                ticker.tick().await;

                let frame = source.get_frame().await;
                let jpeg = match frame {
                    Some(frame) => {
                        misses = 0;
                        {
                            let mut cam = cam.lock().await;
                            self.process_frame(&mut cam, &frame).await;
                        }
                        match frame.to_jpeg() {
                            Ok(jpeg) => Some(jpeg),
                            Err(e) => {
                                tracing::warn!(error = %e, "Frame encode failed, skipping");
                                None
                            }
                        }
                    }
                    None => {
                        misses = misses.saturating_add(1);
                        if misses >= MISSES_BEFORE_PLACEHOLDER {
                            placeholder_frame(width, height, "NO SIGNAL").to_jpeg().ok()
                        } else {
                            None
                        }
                    }
                };

                if let Some(jpeg) = jpeg {
                    yield Ok(mjpeg_part(&jpeg));
                }
            }
        }
    }
}

/// One multipart body part: boundary, JPEG headers, payload.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Single captioned placeholder part, for sources that fail to open.
pub fn placeholder_part(width: u32, height: u32, caption: &str) -> Bytes {
    match placeholder_frame(width, height, caption).to_jpeg() {
        Ok(jpeg) => mjpeg_part(&jpeg),
        Err(_) => Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::model_client::FaceBox;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClassifier {
        scores: Vec<f32>,
        cursor: AtomicUsize,
        fail: bool,
    }

    impl ScriptedClassifier {
        fn new(scores: Vec<f32>) -> Self {
            Self {
                scores,
                cursor: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                scores: vec![],
                cursor: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn score(&self, _frame: &Frame) -> Result<f32> {
            if self.fail {
                return Err(Error::Inference("model server unreachable".to_string()));
            }
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(*self.scores.get(i).unwrap_or(&0.0))
        }
    }

    struct NoFaces;

    #[async_trait]
    impl FaceDetector for NoFaces {
        async fn detect_faces(&self, _frame: &Frame) -> Result<Vec<FaceBox>> {
            Ok(vec![])
        }
    }

    async fn pipeline_with(classifier: Arc<dyn Classifier>) -> (tempfile::TempDir, Arc<Pipeline>) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(
            ArtifactStore::new(dir.path().to_path_buf())
                .await
                .unwrap(),
        );
        let log = Arc::new(IncidentLog::new(100));
        let dispatcher = NotificationDispatcher::new(vec![]);
        let hub = Arc::new(RealtimeHub::new());
        let pipeline = Arc::new(Pipeline::new(
            classifier,
            Arc::new(NoFaces),
            artifacts,
            log,
            dispatcher,
            hub,
        ));
        (dir, pipeline)
    }

    fn frame() -> Frame {
        Frame::from_rgb(16, 16, vec![80u8; 16 * 16 * 3]).unwrap()
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_non_violent() {
        let (_dir, pipeline) = pipeline_with(Arc::new(ScriptedClassifier::failing())).await;
        let cam = pipeline.camera("cam-1", "Lobby").await;
        let mut cam = cam.lock().await;

        let out = pipeline.process_frame(&mut cam, &frame()).await;
        assert_eq!(out.state, DetectionState::Monitoring);
        assert!(out.smoothed < f32::EPSILON);
    }

    #[tokio::test]
    async fn state_transition_is_broadcast_once() {
        let (_dir, pipeline) =
            pipeline_with(Arc::new(ScriptedClassifier::new(vec![0.75; 10]))).await;
        let (_id, mut rx) = pipeline.hub.register().await;

        let cam = pipeline.camera("cam-1", "Lobby").await;
        {
            let mut cam = cam.lock().await;
            for _ in 0..3 {
                pipeline.process_frame(&mut cam, &frame()).await;
            }
        }

        // One transition monitoring -> warning, then no repeats
        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"state\":\"warning\""));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn camera_handles_are_shared_per_id() {
        let (_dir, pipeline) =
            pipeline_with(Arc::new(ScriptedClassifier::new(vec![0.0]))).await;
        let a = pipeline.camera("cam-1", "Lobby").await;
        let b = pipeline.camera("cam-1", "Lobby").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mjpeg_part_is_framed_with_boundary_and_headers() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let text = &part[..];
        assert!(text.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with(b"\xFF\xD9\r\n"));
    }
}
