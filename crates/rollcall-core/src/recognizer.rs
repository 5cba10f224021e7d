//! Face descriptor extraction via ONNX Runtime.
//!
//! The region handed to [`OnnxEmbedder::embed`] is already a face crop; it is
//! resized to the model's input square and normalized per model family.

use crate::backend::{EmbedderKind, Embedder};
use crate::imaging;
use crate::types::FaceDescriptor;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// ArcFace and Facenet normalize differently; do not share these.
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const FACENET_INPUT_SIZE: usize = 160;
const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Tensor layout and normalization for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `[1, 3, S, S]`, `(p - 127.5) / 127.5`.
    ArcFace,
    /// `[1, S, S, 3]`, per-image standardization.
    Facenet,
}

impl Layout {
    fn for_kind(kind: EmbedderKind) -> Self {
        match kind {
            EmbedderKind::ArcFace => Layout::ArcFace,
            EmbedderKind::Facenet512 => Layout::Facenet,
        }
    }

    fn input_size(self) -> usize {
        match self {
            Layout::ArcFace => ARCFACE_INPUT_SIZE,
            Layout::Facenet => FACENET_INPUT_SIZE,
        }
    }
}

pub struct OnnxEmbedder {
    session: Session,
    kind: EmbedderKind,
    layout: Layout,
}

impl OnnxEmbedder {
    pub fn load(kind: EmbedderKind, model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            %kind,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session,
            kind,
            layout: Layout::for_kind(kind),
        })
    }

    fn preprocess(layout: Layout, rgb: &[u8], width: u32, height: u32) -> Result<Array4<f32>, RecognizerError> {
        let img = imaging::to_image(rgb, width, height).ok_or_else(|| {
            RecognizerError::InvalidInput(format!("{} bytes for {width}x{height} RGB", rgb.len()))
        })?;
        if width == 0 || height == 0 {
            return Err(RecognizerError::InvalidInput("empty face region".into()));
        }
        let size = layout.input_size();
        let resized = imaging::resize(&img, size as u32, size as u32);

        match layout {
            Layout::ArcFace => {
                let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
                for (x, y, pixel) in resized.enumerate_pixels() {
                    for c in 0..3 {
                        tensor[[0, c, y as usize, x as usize]] =
                            (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
                    }
                }
                Ok(tensor)
            }
            Layout::Facenet => {
                let raw = resized.as_raw();
                let n = raw.len() as f32;
                let mean = raw.iter().map(|&p| p as f32).sum::<f32>() / n;
                let var = raw.iter().map(|&p| (p as f32 - mean).powi(2)).sum::<f32>() / n;
                // Floor the deviation so flat crops don't divide by zero.
                let std = var.sqrt().max(1.0 / n.sqrt());

                let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
                for (x, y, pixel) in resized.enumerate_pixels() {
                    for c in 0..3 {
                        tensor[[0, y as usize, x as usize, c]] = (pixel.0[c] as f32 - mean) / std;
                    }
                }
                Ok(tensor)
            }
        }
    }
}

impl Embedder for OnnxEmbedder {
    fn name(&self) -> &'static str {
        match self.kind {
            EmbedderKind::ArcFace => "arcface",
            EmbedderKind::Facenet512 => "facenet512",
        }
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<FaceDescriptor, RecognizerError> {
        let input = Self::preprocess(self.layout, rgb, width, height)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(FaceDescriptor::new(raw.to_vec()).l2_normalized())
    }
}
