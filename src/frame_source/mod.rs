//! FrameSource - Threaded Frame Acquisition
//!
//! ## Responsibilities
//!
//! - Continuous frame capture from a device or network stream via ffmpeg
//! - Latest-wins frame slot (lossy; consumers poll, never backlog)
//! - Liveness tracking so idle sources can be reclaimed
//! - Deterministic device release on stop
//!
//! Frames are decoded by ffmpeg to raw RGB24 and read off its stdout in
//! fixed-size chunks, so every stored frame is a complete raster.

mod placeholder;

pub use placeholder::placeholder_frame;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

/// Liveness window: a source unpolled for this long is considered idle
const LIVENESS_WINDOW: Duration = Duration::from_secs(600);

/// An immutable RGB8 snapshot with its capture timestamp.
///
/// Each consumer receives a private clone; mutation by one stage never
/// affects another.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 raster, `width * height * 3` bytes
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame from a packed RGB24 buffer.
    ///
    /// Returns `Validation` if the buffer length does not match the
    /// declared dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "frame buffer {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        })
    }

    /// View as an `image` crate buffer (copies the raster).
    pub fn to_rgb_image(&self) -> image::RgbImage {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .expect("frame raster length validated at construction")
    }

    /// Encode as JPEG for streaming and artifact persistence.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let img = image::DynamicImage::ImageRgb8(self.to_rgb_image());
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageFormat::Jpeg,
        )?;
        Ok(buf)
    }
}

/// FrameSource instance
///
/// One background acquisition task per started source; readers always get
/// a private copy of the most recent capture.
pub struct FrameSource {
    source_url: String,
    width: u32,
    height: u32,
    latest: Arc<RwLock<Option<Frame>>>,
    last_access: Arc<RwLock<Instant>>,
    running: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
}

impl FrameSource {
    /// Create new FrameSource (not yet started)
    pub fn new(source_url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            source_url: source_url.into(),
            width,
            height,
            latest: Arc::new(RwLock::new(None)),
            last_access: Arc::new(RwLock::new(Instant::now())),
            running: Arc::new(AtomicBool::new(false)),
            child: Mutex::new(None),
        }
    }

    /// Open the underlying stream and spawn the acquisition loop.
    ///
    /// Fails with `SourceUnavailable` if ffmpeg cannot be spawned for the
    /// device/URL. A source that spawns but never yields a frame surfaces
    /// as `get_frame() == None`, not as a start error.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(source = %self.source_url, "Source already running");
            return Ok(());
        }

        let mut child = self
            .spawn_ffmpeg()
            .map_err(|e| Error::SourceUnavailable(format!("{}: {}", self.source_url, e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::SourceUnavailable(format!("{}: ffmpeg stdout not captured", self.source_url))
        })?;

        {
            let mut guard = self.child.lock().await;
            *guard = Some(child);
        }

        let latest = self.latest.clone();
        let running = self.running.clone();
        let width = self.width;
        let height = self.height;
        let source_url = self.source_url.clone();
        let frame_len = (width as usize) * (height as usize) * 3;

        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; frame_len];

            while running.load(Ordering::SeqCst) {
                match stdout.read_exact(&mut buf).await {
                    Ok(_) => match Frame::from_rgb(width, height, buf.clone()) {
                        Ok(frame) => {
                            let mut slot = latest.write().await;
                            *slot = Some(frame);
                        }
                        Err(e) => {
                            tracing::warn!(source = %source_url, error = %e, "Dropping malformed frame");
                        }
                    },
                    Err(e) => {
                        // EOF or broken pipe: the device went away or stop()
                        // killed ffmpeg. Consumers keep seeing the last frame.
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!(source = %source_url, error = %e, "Acquisition ended");
                        }
                        break;
                    }
                }
            }

            tracing::debug!(source = %source_url, "Acquisition loop exited");
        });

        tracing::info!(source = %self.source_url, width, height, "Frame source started");
        Ok(())
    }

    fn spawn_ffmpeg(&self) -> std::io::Result<Child> {
        let size = format!("{}x{}", self.width, self.height);
        let mut cmd = Command::new("ffmpeg");

        if self.source_url.starts_with("rtsp://") {
            cmd.args(["-rtsp_transport", "tcp", "-i", &self.source_url]);
        } else if self.source_url.starts_with("/dev/") {
            cmd.args(["-f", "v4l2", "-video_size", &size, "-i", &self.source_url]);
        } else {
            cmd.args(["-i", &self.source_url]);
        }

        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &size,
            "-an",
            "-loglevel",
            "error",
            "-",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    }

    /// Latest captured frame, or `None` if nothing has been captured yet.
    ///
    /// Always returns a private copy and refreshes the liveness stamp.
    pub async fn get_frame(&self) -> Option<Frame> {
        {
            let mut access = self.last_access.write().await;
            *access = Instant::now();
        }
        let slot = self.latest.read().await;
        slot.clone()
    }

    /// Whether the source has been polled within the liveness window.
    ///
    /// Used by `SourceManager` to reclaim sources nobody is watching.
    pub async fn is_active(&self) -> bool {
        let access = self.last_access.read().await;
        access.elapsed() < LIVENESS_WINDOW
    }

    /// Stop acquisition and release the device. Idempotent; safe to call
    /// while the acquisition task is mid-read.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.start_kill() {
                tracing::warn!(source = %self.source_url, error = %e, "ffmpeg kill failed");
            }
            let _ = child.wait().await;
            tracing::info!(source = %self.source_url, "Frame source stopped");
        }
    }

    /// Source URL (for logging)
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[cfg(test)]
    pub(crate) async fn inject_frame(&self, frame: Frame) {
        let mut slot = self.latest.write().await;
        *slot = Some(frame);
    }

    #[cfg(test)]
    pub(crate) async fn age_access(&self, by: Duration) {
        let mut access = self.last_access.write().await;
        *access = Instant::now() - by;
    }
}

/// SourceManager - owns the started sources, keyed by camera id
pub struct SourceManager {
    sources: RwLock<HashMap<String, Arc<FrameSource>>>,
}

impl SourceManager {
    /// Create new SourceManager
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Get an already-started source, or start one for the given URL.
    pub async fn get_or_start(
        &self,
        camera_id: &str,
        source_url: &str,
        width: u32,
        height: u32,
    ) -> Result<Arc<FrameSource>> {
        {
            let sources = self.sources.read().await;
            if let Some(source) = sources.get(camera_id) {
                return Ok(source.clone());
            }
        }

        let source = Arc::new(FrameSource::new(source_url, width, height));
        source.start().await?;

        let mut sources = self.sources.write().await;
        // A concurrent request may have raced us; keep the first one.
        if let Some(existing) = sources.get(camera_id) {
            source.stop().await;
            return Ok(existing.clone());
        }
        sources.insert(camera_id.to_string(), source.clone());

        tracing::info!(camera_id = %camera_id, source = %source_url, "Camera source registered");
        Ok(source)
    }

    /// Stop and remove a source
    pub async fn remove(&self, camera_id: &str) -> bool {
        let source = {
            let mut sources = self.sources.write().await;
            sources.remove(camera_id)
        };

        match source {
            Some(s) => {
                s.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop and remove sources that have not been polled recently.
    ///
    /// Returns the number of sources reclaimed.
    pub async fn cleanup_inactive(&self) -> usize {
        let idle: Vec<(String, Arc<FrameSource>)> = {
            let sources = self.sources.read().await;
            let mut idle = Vec::new();
            for (id, source) in sources.iter() {
                if !source.is_active().await {
                    idle.push((id.clone(), source.clone()));
                }
            }
            idle
        };

        let count = idle.len();
        for (id, source) in idle {
            source.stop().await;
            let mut sources = self.sources.write().await;
            sources.remove(&id);
            tracing::info!(camera_id = %id, "Reclaimed idle camera source");
        }

        count
    }

    /// Number of live sources
    pub async fn count(&self) -> usize {
        let sources = self.sources.read().await;
        sources.len()
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_rgb(width, height, vec![value; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        let result = Frame::from_rgb(4, 4, vec![0u8; 10]);
        assert!(result.is_err());
    }

    #[test]
    fn frame_encodes_to_jpeg() {
        let frame = solid_frame(16, 16, 128);
        let jpeg = frame.to_jpeg().unwrap();
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn get_frame_returns_none_before_first_capture() {
        let source = FrameSource::new("rtsp://example/none", 4, 4);
        assert!(source.get_frame().await.is_none());
    }

    #[tokio::test]
    async fn get_frame_returns_private_copy() {
        let source = FrameSource::new("rtsp://example/copy", 2, 2);
        source.inject_frame(solid_frame(2, 2, 10)).await;

        let mut a = source.get_frame().await.unwrap();
        a.data[0] = 99;
        let b = source.get_frame().await.unwrap();
        assert_eq!(b.data[0], 10);
    }

    #[tokio::test]
    async fn polling_keeps_source_active() {
        let source = FrameSource::new("rtsp://example/live", 2, 2);
        assert!(source.is_active().await);

        source.age_access(Duration::from_secs(601)).await;
        assert!(!source.is_active().await);

        // A poll refreshes the stamp
        let _ = source.get_frame().await;
        assert!(source.is_active().await);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let source = FrameSource::new("rtsp://example/stop", 2, 2);
        source.stop().await;
        source.stop().await;
    }

    #[tokio::test]
    async fn manager_reclaims_idle_sources() {
        let manager = SourceManager::new();
        let source = Arc::new(FrameSource::new("rtsp://example/idle", 2, 2));
        {
            let mut sources = manager.sources.write().await;
            sources.insert("cam1".to_string(), source.clone());
        }

        assert_eq!(manager.cleanup_inactive().await, 0);

        source.age_access(Duration::from_secs(601)).await;
        assert_eq!(manager.cleanup_inactive().await, 1);
        assert_eq!(manager.count().await, 0);
    }
}
