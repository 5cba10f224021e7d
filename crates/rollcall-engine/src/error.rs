use rollcall_core::{DetectorError, GalleryError, RecognizerError};
use rollcall_hw::CameraError;
use thiserror::Error;

/// Conditions that prevent a run from starting. The pipeline stays idle.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("gallery load failed: {0}")]
    GalleryLoadFailed(#[source] GalleryError),
    #[error("gallery has no identities")]
    GalleryEmpty,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(#[from] CameraError),
    #[error("detector backend: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding backend: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("gallery descriptors are {gallery}-dim but the embedder produces {embedder}-dim")]
    DimensionMismatch { gallery: usize, embedder: usize },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<GalleryError> for StartError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::Empty(_) => StartError::GalleryEmpty,
            other => StartError::GalleryLoadFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_gallery_maps_to_gallery_empty() {
        let e: StartError = GalleryError::Empty(PathBuf::from("g.json")).into();
        assert!(matches!(e, StartError::GalleryEmpty));
    }

    #[test]
    fn test_missing_gallery_maps_to_load_failed() {
        let e: StartError = GalleryError::NotFound(PathBuf::from("g.json")).into();
        assert!(matches!(e, StartError::GalleryLoadFailed(GalleryError::NotFound(_))));
        assert!(e.to_string().contains("g.json"));
    }
}
