//! SCRFD detector on ONNX Runtime.
//!
//! Input is letterboxed into a 640×640 square; the model emits score, box and
//! landmark maps for strides 8, 16 and 32. Scores and boxes are decoded here
//! and merged by NMS; landmark maps are not read.

use crate::backend::Detector;
use crate::imaging;
use crate::nms::{nms, Detection};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_SCALE: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the frame landed inside the square model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap_x(&self, v: f32) -> f32 {
        (v - self.pad_x) / self.scale
    }

    fn unmap_y(&self, v: f32) -> f32 {
        (v - self.pad_y) / self.scale
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
}

pub struct ScrfdDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 3 * STRIDES.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "expected score/bbox/kps outputs for {} strides, model has {} outputs",
                STRIDES.len(),
                names.len()
            )));
        }

        let slots = stride_slots(&names);
        tracing::debug!(?slots, "SCRFD output mapping");

        Ok(Self { session, slots })
    }

    /// Run the model and return NMS-filtered candidates, most confident first.
    pub fn detect_candidates(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(rgb, width, height)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let extract = |index: usize, what: &str, stride: usize| {
            outputs[index]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("{what} map, stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (slots, &stride) in self.slots.iter().zip(STRIDES.iter()) {
            let scores = extract(slots.score, "score", stride)?;
            let boxes = extract(slots.bbox, "bbox", stride)?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, SCORE_THRESHOLD));
        }

        Ok(nms(candidates, IOU_THRESHOLD))
    }
}

/// Scale the frame to fit the square input, centre it, normalize to NCHW.
fn letterbox_tensor(rgb: &[u8], width: u32, height: u32) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let img = imaging::to_image(rgb, width, height).ok_or_else(|| {
        DetectorError::InvalidInput(format!("{} bytes for {width}x{height} RGB", rgb.len()))
    })?;

    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let fit_w = ((width as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
    let fit_h = ((height as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
    let letterbox = Letterbox {
        scale,
        pad_x: (INPUT_SIZE - fit_w) as f32 / 2.0,
        pad_y: (INPUT_SIZE - fit_h) as f32 / 2.0,
    };
    let resized = imaging::resize(&img, fit_w as u32, fit_h as u32);

    // Border stays 0.0, i.e. mid-grey after normalization.
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, off_y + y as usize, off_x + x as usize]] =
                (pixel.0[c] as f32 - PIXEL_MEAN) / PIXEL_SCALE;
        }
    }

    Ok((tensor, letterbox))
}

impl Detector for ScrfdDetector {
    fn name(&self) -> &'static str {
        "scrfd"
    }

    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self
            .detect_candidates(rgb, width, height)?
            .iter()
            .map(Detection::to_bbox)
            .collect())
    }
}

/// Map stride levels to output positions.
///
/// Exports that name their outputs `score_8`, `bbox_16`, ... are matched by
/// name. Anything else is assumed to use the usual grouping: three score maps,
/// then three box maps, then three landmark maps.
fn stride_slots(names: &[String]) -> [StrideSlots; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideSlots>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideSlots {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
            })
        })
        .collect();

    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => {
            tracing::debug!("SCRFD outputs are unnamed, assuming grouped order");
            std::array::from_fn(|level| StrideSlots {
                score: level,
                bbox: level + STRIDES.len(),
            })
        }
    }
}

/// Turn one stride's maps into frame-space detections above `threshold`.
///
/// Each grid cell carries [`ANCHORS_PER_CELL`] anchors; box
/// values are distances from the cell origin in units of the stride.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let cells = INPUT_SIZE / stride;
    let step = stride as f32;

    scores
        .iter()
        .take(cells * cells * ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(anchor, &score)| {
            let cell = anchor / ANCHORS_PER_CELL;
            let ox = (cell % cells) as f32 * step;
            let oy = (cell / cells) as f32 * step;

            let d = boxes.get(anchor * 4..anchor * 4 + 4)?;
            let left = letterbox.unmap_x(ox - d[0] * step);
            let top = letterbox.unmap_y(oy - d[1] * step);
            let right = letterbox.unmap_x(ox + d[2] * step);
            let bottom = letterbox.unmap_y(oy + d[3] * step);

            Some(Detection {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                confidence: score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(score: usize, bbox: usize) -> StrideSlots {
        StrideSlots { score, bbox }
    }

    fn to_strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn anchors_at(stride: usize) -> usize {
        let cells = INPUT_SIZE / stride;
        cells * cells * ANCHORS_PER_CELL
    }

    #[test]
    fn test_stride_slots_by_name_in_any_order() {
        let names = to_strings(&[
            "kps_32", "bbox_32", "score_32", "kps_16", "bbox_16", "score_16", "kps_8", "bbox_8",
            "score_8",
        ]);
        assert_eq!(stride_slots(&names), [slots(8, 7), slots(5, 4), slots(2, 1)]);
    }

    #[test]
    fn test_stride_slots_grouped_fallback() {
        let names: Vec<String> = (440..449).map(|i: usize| format!("onnx::{i}")).collect();
        assert_eq!(stride_slots(&names), [slots(0, 3), slots(1, 4), slots(2, 5)]);
    }

    #[test]
    fn test_stride_slots_partial_names_fall_back() {
        let names = to_strings(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "a", "b", "c",
        ]);
        assert_eq!(stride_slots(&names)[2], slots(2, 5));
    }

    #[test]
    fn test_decode_stride_undoes_letterbox() {
        // 320x240 frame letterboxed into 640: scale 2, 80 px bands top and bottom
        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let stride = 32;
        let cells = INPUT_SIZE / stride;
        let anchors = anchors_at(stride);

        // First anchor of the cell at column 2, row 3
        let hit = (3 * cells + 2) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[hit] = 0.9;
        let mut boxes = vec![0.0f32; anchors * 4];
        boxes[hit * 4..hit * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_stride(&scores, &boxes, stride, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // Model space x 32..96, y 64..128 is frame space x 16..48, y -8..24
        assert!((d.x - 16.0).abs() < 1e-4);
        assert!((d.y + 8.0).abs() < 1e-4);
        assert!((d.width - 32.0).abs() < 1e-4);
        assert!((d.height - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_score_must_exceed_threshold() {
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let anchors = anchors_at(32);
        let scores = vec![0.5f32; anchors];
        let boxes = vec![1.0f32; anchors * 4];
        assert!(decode_stride(&scores, &boxes, 32, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_decode_stride_skips_anchors_past_box_map() {
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let anchors = anchors_at(32);
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.8;
        scores[1] = 0.8;
        // Box map covers only the first anchor
        let boxes = vec![1.0f32; 4];
        let dets = decode_stride(&scores, &boxes, 32, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.8).abs() < 1e-6);
    }
}
