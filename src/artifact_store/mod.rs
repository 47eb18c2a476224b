//! ArtifactStore - Incident Image Persistence
//!
//! ## Responsibilities
//!
//! - JPEG persistence of representative frames and face crops
//! - Path layout keyed by incident id (faces 1-based)
//! - Relative paths for URL mapping under /static
//!
//! Layout under the base dir:
//!   uploads/incident_{id}.jpg
//!   uploads/faces/incident_{id}_face_{n}.jpg

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use std::path::{Path, PathBuf};
use tokio::fs;

/// ArtifactStore instance
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store and its directory tree.
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_dir.join("uploads").join("faces")).await?;
        Ok(Self { base_dir })
    }

    /// Persist the representative frame for a finalized incident.
    ///
    /// Returns the relative path (`uploads/incident_{id}.jpg`).
    pub async fn save_representative(&self, incident_id: u64, frame: &Frame) -> Result<String> {
        let rel = format!("uploads/incident_{}.jpg", incident_id);
        self.write_jpeg(&rel, frame).await?;
        Ok(rel)
    }

    /// Persist one face crop; `face_index` is 1-based.
    pub async fn save_face(
        &self,
        incident_id: u64,
        face_index: usize,
        crop: &Frame,
    ) -> Result<String> {
        let rel = format!("uploads/faces/incident_{}_face_{}.jpg", incident_id, face_index);
        self.write_jpeg(&rel, crop).await?;
        Ok(rel)
    }

    async fn write_jpeg(&self, rel: &str, frame: &Frame) -> Result<()> {
        let jpeg = frame
            .to_jpeg()
            .map_err(|e| Error::ArtifactPersist(format!("{}: {}", rel, e)))?;

        let path = self.base_dir.join(rel);
        fs::write(&path, &jpeg)
            .await
            .map_err(|e| Error::ArtifactPersist(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            path = %path.display(),
            size = jpeg.len(),
            "Saved incident artifact"
        );
        Ok(())
    }

    /// Base directory the relative paths hang off
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32) -> Frame {
        Frame::from_rgb(w, h, vec![90u8; (w * h * 3) as usize]).unwrap()
    }

    #[tokio::test]
    async fn representative_path_is_keyed_by_incident_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).await.unwrap();

        let rel = store.save_representative(7, &frame(32, 24)).await.unwrap();
        assert_eq!(rel, "uploads/incident_7.jpg");
        assert!(dir.path().join(&rel).exists());
    }

    #[tokio::test]
    async fn face_paths_are_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).await.unwrap();

        let rel = store.save_face(3, 1, &frame(16, 16)).await.unwrap();
        assert_eq!(rel, "uploads/faces/incident_3_face_1.jpg");
        assert!(dir.path().join(&rel).exists());
    }

    #[tokio::test]
    async fn write_failure_maps_to_artifact_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf()).await.unwrap();
        // Remove the tree underneath the store to force the write to fail
        std::fs::remove_dir_all(dir.path().join("uploads")).unwrap();

        let err = store
            .save_representative(1, &frame(8, 8))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactPersist(_)));
    }
}
