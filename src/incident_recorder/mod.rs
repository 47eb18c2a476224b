//! IncidentRecorder - Incident Lifecycle and Evidence Capture
//!
//! ## Responsibilities
//!
//! - Open an incident when the detection signal rises
//! - Buffer a bounded prefix of frames for the episode
//! - Run face localization exactly once per incident
//! - Finalize with a representative frame when the signal falls
//!
//! One recorder per camera; the pipeline drives it strictly in frame
//! order so no internal locking is needed.

use crate::artifact_store::ArtifactStore;
use crate::frame_source::Frame;
use crate::incident_log::IncidentLog;
use crate::model_client::{FaceBox, FaceDetector};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;

/// Saved face crop with its source geometry
#[derive(Debug, Clone, Serialize)]
pub struct FaceArtifact {
    pub path: String,
    pub bbox: FaceBox,
    pub confidence: f32,
}

/// Incident lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentLifecycle {
    Active,
    Finalized,
}

/// One violence episode, from signal rise to signal fall.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: u64,
    /// Local civil time at open, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    pub location: String,
    pub faces_detected: bool,
    pub faces: Vec<FaceArtifact>,
    /// Relative path of the representative frame, set at finalize
    pub image_path: Option<String>,
    pub lifecycle: IncidentLifecycle,
}

impl Incident {
    pub fn open(id: u64, location: String) -> Self {
        Self {
            id,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            location,
            faces_detected: false,
            faces: Vec::new(),
            image_path: None,
            lifecycle: IncidentLifecycle::Active,
        }
    }

    pub fn finalize(&mut self, image_path: String) {
        self.image_path = Some(image_path);
        self.lifecycle = IncidentLifecycle::Finalized;
    }

    pub fn face_paths(&self) -> Vec<String> {
        self.faces.iter().map(|f| f.path.clone()).collect()
    }
}

/// Recorder tunables
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Maximum buffered frames per incident (prefix sample)
    pub max_frames: usize,
    /// Buffered-frame count at which face localization runs
    pub face_detect_min_frames: usize,
    /// Margin in pixels added around face boxes before cropping
    pub face_margin: i32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_frames: 30,
            face_detect_min_frames: 10,
            face_margin: 20,
        }
    }
}

/// Per-camera incident recorder
pub struct IncidentRecorder {
    config: RecorderConfig,
    location: String,
    log: Arc<IncidentLog>,
    buffer: Vec<Frame>,
    current: Option<Incident>,
    face_pass_done: bool,
}

impl IncidentRecorder {
    pub fn new(location: String, log: Arc<IncidentLog>) -> Self {
        Self::with_config(location, log, RecorderConfig::default())
    }

    pub fn with_config(location: String, log: Arc<IncidentLog>, config: RecorderConfig) -> Self {
        Self {
            config,
            location,
            log,
            buffer: Vec::new(),
            current: None,
            face_pass_done: false,
        }
    }

    /// Feed one frame with its detection signal.
    ///
    /// Returns the finalized incident on the frame where the signal
    /// falls; `None` otherwise. A fall with an empty buffer discards the
    /// episode silently, and a representative-persist failure discards
    /// it with an error log. Either way the recorder re-arms.
    pub async fn observe(
        &mut self,
        incident_signal: bool,
        frame: &Frame,
        face_detector: &dyn FaceDetector,
        artifacts: &ArtifactStore,
    ) -> Option<Incident> {
        if incident_signal {
            if self.current.is_none() {
                let id = self.log.allocate_id();
                tracing::info!(
                    incident_id = id,
                    location = %self.location,
                    "Incident opened"
                );
                self.current = Some(Incident::open(id, self.location.clone()));
                self.buffer.clear();
                self.face_pass_done = false;
            }

            if self.buffer.len() < self.config.max_frames {
                self.buffer.push(frame.clone());
            }

            if !self.face_pass_done && self.buffer.len() >= self.config.face_detect_min_frames {
                self.face_pass_done = true;
                self.run_face_pass(frame, face_detector, artifacts).await;
            }

            return None;
        }

        let mut incident = self.current.take()?;
        self.face_pass_done = false;

        if self.buffer.is_empty() {
            tracing::debug!(incident_id = incident.id, "Empty incident discarded");
            return None;
        }

        let representative = &self.buffer[self.buffer.len() / 2];
        let result = artifacts
            .save_representative(incident.id, representative)
            .await;
        let frames = self.buffer.len();
        self.buffer.clear();

        match result {
            Ok(path) => {
                incident.finalize(path);
                tracing::info!(
                    incident_id = incident.id,
                    location = %incident.location,
                    frames = frames,
                    faces = incident.faces.len(),
                    "Incident finalized"
                );
                Some(incident)
            }
            Err(e) => {
                tracing::error!(
                    incident_id = incident.id,
                    error = %e,
                    "Failed to persist representative frame, incident discarded"
                );
                None
            }
        }
    }

    /// True while an incident is open
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    #[cfg(test)]
    pub(crate) fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Runs at most once per incident. Detector errors leave the
    /// incident with no faces; the pass is never retried.
    async fn run_face_pass(
        &mut self,
        frame: &Frame,
        face_detector: &dyn FaceDetector,
        artifacts: &ArtifactStore,
    ) {
        let incident = match self.current.as_mut() {
            Some(i) => i,
            None => return,
        };

        let faces = match face_detector.detect_faces(frame).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(
                    incident_id = incident.id,
                    error = %e,
                    "Face detection failed, continuing without faces"
                );
                return;
            }
        };

        tracing::debug!(
            incident_id = incident.id,
            faces = faces.len(),
            "Face detection complete"
        );

        for (i, bbox) in faces.iter().enumerate() {
            let crop = match crop_face(frame, bbox, self.config.face_margin) {
                Some(crop) => crop,
                None => continue,
            };

            match artifacts.save_face(incident.id, i + 1, &crop).await {
                Ok(path) => {
                    incident.faces.push(FaceArtifact {
                        path,
                        bbox: bbox.clone(),
                        confidence: bbox.confidence,
                    });
                    incident.faces_detected = true;
                }
                Err(e) => {
                    tracing::warn!(
                        incident_id = incident.id,
                        face = i + 1,
                        error = %e,
                        "Failed to persist face crop"
                    );
                }
            }
        }
    }
}

/// Crop a face region with margin, clamped to frame bounds.
///
/// Returns `None` when the clamped region is empty (box entirely
/// outside the frame).
fn crop_face(frame: &Frame, bbox: &FaceBox, margin: i32) -> Option<Frame> {
    let x0 = (bbox.x - margin).max(0) as u32;
    let y0 = (bbox.y - margin).max(0) as u32;
    let x1 = ((bbox.x + bbox.width as i32 + margin).max(0) as u32).min(frame.width);
    let y1 = ((bbox.y + bbox.height as i32 + margin).max(0) as u32).min(frame.height);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let image = frame.to_rgb_image();
    let cropped = image::imageops::crop_imm(&image, x0, y0, x1 - x0, y1 - y0).to_image();
    let (w, h) = (cropped.width(), cropped.height());
    Frame::from_rgb(w, h, cropped.into_raw()).ok()
}
