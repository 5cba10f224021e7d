//! rollcall-core — face detection, descriptor extraction and gallery matching.
//!
//! Detectors (SCRFD, UltraFace) and embedders (ArcFace, Facenet512) run on
//! ONNX Runtime for CPU inference and sit behind the [`Detector`] and
//! [`Embedder`] traits so the pipeline never names a concrete backend.

pub mod backend;
pub mod detector;
pub mod gallery;
pub mod imaging;
pub mod nms;
pub mod recognizer;
pub mod types;
pub mod ultraface;

use std::path::PathBuf;

pub use backend::{
    load_detector, load_embedder, Detector, DetectorError, DetectorKind, Embedder, EmbedderKind,
    ModelSelector, RecognizerError,
};
pub use gallery::{enroll_directory, CosineMatcher, Gallery, GalleryError, Match, Matcher};
pub use types::{BoundingBox, FaceDescriptor, Identity, RecognitionResult, UNKNOWN_LABEL};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/rollcall/models`,
/// falling back to `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

/// Default gallery location: `$XDG_DATA_HOME/rollcall/gallery.json`.
pub fn default_gallery_path() -> PathBuf {
    data_dir().join("gallery.json")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
