//! Detection and embedding capabilities, and the factory that builds them.
//!
//! Backends are chosen by enum at construction time. Each kind knows its
//! model file name; the factory resolves it against a model directory.

use crate::types::{BoundingBox, FaceDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use crate::detector::DetectorError;
pub use crate::recognizer::RecognizerError;

/// Locates faces in an RGB image.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Return face boxes in the image's own pixel coordinates, in detection
    /// order (highest confidence first for the ONNX backends).
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Turns an already-localized face region into a descriptor.
///
/// Implementations must not run their own detection on the region.
pub trait Embedder: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Length of every descriptor this backend produces.
    fn dimension(&self) -> usize;

    fn embed(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<FaceDescriptor, RecognizerError>;
}

/// Available face detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// SCRFD: multi-stride, letterboxed 640×640 input.
    #[default]
    Scrfd,
    /// Ultra-Light-Fast RFB-320: small anchor-based detector.
    UltraFace,
}

impl DetectorKind {
    pub fn model_file(&self) -> &'static str {
        match self {
            DetectorKind::Scrfd => "det_10g.onnx",
            DetectorKind::UltraFace => "version-RFB-320.onnx",
        }
    }
}

/// Available descriptor models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    ArcFace,
    Facenet512,
}

impl EmbedderKind {
    pub fn model_file(&self) -> &'static str {
        match self {
            EmbedderKind::ArcFace => "w600k_r50.onnx",
            EmbedderKind::Facenet512 => "facenet512.onnx",
        }
    }
}

/// Which detector and embedder a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelSelector {
    pub detector: DetectorKind,
    pub embedder: EmbedderKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBackend(pub String);

impl fmt::Display for UnknownBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown backend: {}", self.0)
    }
}

impl std::error::Error for UnknownBackend {}

impl FromStr for DetectorKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scrfd" => Ok(DetectorKind::Scrfd),
            "ultraface" | "rfb320" => Ok(DetectorKind::UltraFace),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arcface" => Ok(EmbedderKind::ArcFace),
            "facenet512" => Ok(EmbedderKind::Facenet512),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectorKind::Scrfd => "scrfd",
            DetectorKind::UltraFace => "ultraface",
        })
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmbedderKind::ArcFace => "arcface",
            EmbedderKind::Facenet512 => "facenet512",
        })
    }
}

/// Load the ONNX detector for `kind` from `model_dir`.
pub fn load_detector(kind: DetectorKind, model_dir: &Path) -> Result<Box<dyn Detector>, DetectorError> {
    let path = model_dir.join(kind.model_file());
    let path = path.to_string_lossy();
    Ok(match kind {
        DetectorKind::Scrfd => Box::new(crate::detector::ScrfdDetector::load(&path)?),
        DetectorKind::UltraFace => Box::new(crate::ultraface::UltraFaceDetector::load(&path)?),
    })
}

/// Load the ONNX embedder for `kind` from `model_dir`.
pub fn load_embedder(kind: EmbedderKind, model_dir: &Path) -> Result<Box<dyn Embedder>, RecognizerError> {
    let path = model_dir.join(kind.model_file());
    Ok(Box::new(crate::recognizer::OnnxEmbedder::load(
        kind,
        &path.to_string_lossy(),
    )?))
}
