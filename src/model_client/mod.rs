//! ModelClient - External Model Server Adapter
//!
//! ## Responsibilities
//!
//! - Send classification requests to the violence model server
//! - Send face-localization requests to the face detector endpoint
//! - Response parsing and connection management
//!
//! Both models are black boxes behind HTTP. The pipeline only relies on
//! the contracts: frame -> confidence in [0,1], and frame -> face boxes.
//! Failure policy (score errors become 0.0, face errors become an empty
//! list) lives in the callers, which also own the logging.

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Model input size per the classifier's training convention
const CLASSIFIER_INPUT: u32 = 128;

/// Violence classifier contract: one frame in, one confidence out.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn score(&self, frame: &Frame) -> Result<f32>;
}

/// Face localization contract. An empty list is a valid "no faces".
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceBox>>;
}

/// Face bounding box with detector confidence.
///
/// x/y may be negative for faces partially outside the frame; crops are
/// clamped to frame bounds downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

/// Score endpoint response
#[derive(Debug, Clone, Deserialize)]
struct ScoreResponse {
    confidence: f32,
}

/// Faces endpoint response
#[derive(Debug, Clone, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<FaceBox>,
}

/// HTTP adapter for the model server
pub struct ModelClient {
    client: reqwest::Client,
    base_url: String,
}

impl ModelClient {
    /// Create new model client
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new model client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check model server health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Downscale to the classifier input size and encode as JPEG.
    ///
    /// The server normalizes pixels to [0,1]; we only guarantee geometry
    /// and channel order here.
    fn classifier_input_jpeg(frame: &Frame) -> Result<Vec<u8>> {
        let resized = image::imageops::resize(
            &frame.to_rgb_image(),
            CLASSIFIER_INPUT,
            CLASSIFIER_INPUT,
            image::imageops::FilterType::Triangle,
        );
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(resized)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
        Ok(buf)
    }
}

#[async_trait]
impl Classifier for ModelClient {
    async fn score(&self, frame: &Frame) -> Result<f32> {
        let url = format!("{}/v1/score", self.base_url);
        let jpeg = Self::classifier_input_jpeg(frame)?;

        let form = Form::new()
            .part(
                "frame",
                Part::bytes(jpeg)
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")
                    .map_err(|e| Error::Inference(e.to_string()))?,
            )
            .text("captured_at", frame.captured_at.to_rfc3339());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Inference(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "score endpoint returned {}",
                resp.status()
            )));
        }

        let body: ScoreResponse = resp
            .json()
            .await
            .map_err(|e| Error::Inference(e.to_string()))?;

        Ok(body.confidence.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl FaceDetector for ModelClient {
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceBox>> {
        let url = format!("{}/v1/faces", self.base_url);
        let jpeg = frame.to_jpeg()?;

        let form = Form::new().part(
            "frame",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .map_err(|e| Error::FaceDetection(e.to_string()))?,
        );

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::FaceDetection(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::FaceDetection(format!(
                "faces endpoint returned {}",
                resp.status()
            )));
        }

        let body: FacesResponse = resp
            .json()
            .await
            .map_err(|e| Error::FaceDetection(e.to_string()))?;

        Ok(body.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_box_deserializes_from_detector_schema() {
        let json = r#"{"faces":[{"x":-4,"y":12,"width":64,"height":80,"confidence":0.97}]}"#;
        let resp: FacesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.faces.len(), 1);
        assert_eq!(resp.faces[0].x, -4);
        assert!((resp.faces[0].confidence - 0.97).abs() < 1e-6);
    }

    #[test]
    fn empty_faces_field_defaults_to_no_faces() {
        let resp: FacesResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.faces.is_empty());
    }

    #[test]
    fn classifier_input_is_resized() {
        let frame = Frame::from_rgb(64, 48, vec![40u8; 64 * 48 * 3]).unwrap();
        let jpeg = ModelClient::classifier_input_jpeg(&frame).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(img.width(), CLASSIFIER_INPUT);
        assert_eq!(img.height(), CLASSIFIER_INPUT);
    }
}
