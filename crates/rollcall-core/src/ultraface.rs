//! Ultra-Light-Fast-Generic-Face-Detector (RFB-320) via ONNX Runtime.
//!
//! Fixed 320×240 input; the exported graph already decodes its priors, so the
//! `boxes` output holds normalized corner coordinates.

use crate::backend::Detector;
use crate::detector::DetectorError;
use crate::imaging;
use crate::nms::{nms, Detection};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ULTRAFACE_INPUT_WIDTH: u32 = 320;
const ULTRAFACE_INPUT_HEIGHT: u32 = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

pub struct UltraFaceDetector {
    session: Session,
    scores_idx: usize,
    boxes_idx: usize,
}

impl UltraFaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?output_names, "loaded UltraFace model");

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let scores_idx = output_names.iter().position(|n| n == "scores").unwrap_or(0);
        let boxes_idx = output_names.iter().position(|n| n == "boxes").unwrap_or(1);

        Ok(Self {
            session,
            scores_idx,
            boxes_idx,
        })
    }

    fn preprocess(rgb: &[u8], width: u32, height: u32) -> Result<Array4<f32>, DetectorError> {
        let img = imaging::to_image(rgb, width, height).ok_or_else(|| {
            DetectorError::InvalidInput(format!("{} bytes for {width}x{height} RGB", rgb.len()))
        })?;
        let resized = imaging::resize(&img, ULTRAFACE_INPUT_WIDTH, ULTRAFACE_INPUT_HEIGHT);

        let mut tensor = Array4::<f32>::zeros((
            1,
            3,
            ULTRAFACE_INPUT_HEIGHT as usize,
            ULTRAFACE_INPUT_WIDTH as usize,
        ));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            }
        }
        Ok(tensor)
    }
}

impl Detector for UltraFaceDetector {
    fn name(&self) -> &'static str {
        "ultraface"
    }

    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = Self::preprocess(rgb, width, height)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );

        Ok(nms(candidates, ULTRAFACE_NMS_THRESHOLD)
            .iter()
            .map(Detection::to_bbox)
            .collect())
    }
}

/// Decode `[N, 2]` class scores and `[N, 4]` normalized corners into frame space.
fn decode(scores: &[f32], boxes: &[f32], width: f32, height: f32, threshold: f32) -> Vec<Detection> {
    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[1] > threshold)
        .map(|(s, b)| {
            let x1 = b[0] * width;
            let y1 = b[1] * height;
            Detection {
                x: x1,
                y: y1,
                width: b[2] * width - x1,
                height: b[3] * height - y1,
                confidence: s[1],
            }
        })
        .collect()
}
