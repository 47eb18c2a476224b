//! Vigil Camserver Library
//!
//! Live violence-detection video pipeline
//!
//! ## Architecture (9 Components)
//!
//! 1. FrameSource - Frame acquisition from cameras (ffmpeg)
//! 2. ModelClient - Violence/face model server adapter
//! 3. Detector - Confidence smoothing + hysteresis state machine
//! 4. IncidentRecorder - Incident lifecycle and evidence capture
//! 5. ArtifactStore - Incident image persistence
//! 6. IncidentLog - Finalized incident ring buffer + CSV export
//! 7. Notifier - Email notification dispatch
//! 8. RealtimeHub - WebSocket distribution
//! 9. WebAPI - REST API endpoints + MJPEG streaming
//!
//! ## Design Principles
//!
//! - Per-camera pipelines; no globals
//! - Degrade, don't crash: in-loop failures never kill the stream
//! - Single responsibility per module

pub mod artifact_store;
pub mod detector;
pub mod error;
pub mod frame_source;
pub mod incident_log;
pub mod incident_recorder;
pub mod model_client;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod realtime_hub;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
