use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for faces that match no gallery identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Face bounding box in frame-pixel coordinates, corners `(x1, y1)`–`(x2, y2)`.
///
/// Detectors may produce boxes that reach outside the frame; call
/// [`clamped`](Self::clamped) before using one to address pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width().max(0) as i64 * self.height().max(0) as i64
    }

    /// Scale each coordinate independently, truncating toward zero.
    pub fn scaled(&self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x1: (self.x1 as f32 * scale_x) as i32,
            y1: (self.y1 as f32 * scale_y) as i32,
            x2: (self.x2 as f32 * scale_x) as i32,
            y2: (self.y2 as f32 * scale_y) as i32,
        }
    }

    /// Grow the box by `margin` pixels on every side.
    pub fn expanded(&self, margin: i32) -> Self {
        Self {
            x1: self.x1 - margin,
            y1: self.y1 - margin,
            x2: self.x2 + margin,
            y2: self.y2 + margin,
        }
    }

    /// Clamp to `[0, width] × [0, height]`.
    ///
    /// Returns `None` if the clamped box is empty.
    pub fn clamped(&self, width: u32, height: u32) -> Option<Self> {
        let w = width as i32;
        let h = height as i32;
        let b = Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        (b.x1 < b.x2 && b.y1 < b.y2).then_some(b)
    }

    /// The pixel region to hand to the embedder: the box plus `margin`,
    /// clamped to the frame.
    pub fn face_region(&self, margin: i32, width: u32, height: u32) -> Option<Self> {
        self.expanded(margin).clamped(width, height)
    }
}

/// Face descriptor (embedding) vector.
///
/// Serializes as a bare array of floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Zero vectors have similarity 0 with everything.
    pub fn similarity(&self, other: &FaceDescriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance `1 - similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &FaceDescriptor) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Scale to unit length. Zero vectors are left untouched.
    pub fn l2_normalized(mut self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in self.values.iter_mut() {
                *v /= norm;
            }
        }
        self
    }
}

/// Who a face was matched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }

    pub fn label(&self) -> &str {
        self.name().unwrap_or(UNKNOWN_LABEL)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        if s == UNKNOWN_LABEL {
            Identity::Unknown
        } else {
            Identity::Known(s)
        }
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        match id {
            Identity::Known(name) => name,
            Identity::Unknown => UNKNOWN_LABEL.to_string(),
        }
    }
}

/// One recognized (or unrecognized) face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(rename = "name")]
    pub identity: Identity,
    /// `max(0, 1 - distance)` for a match, 0 for unknown faces.
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = desc(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = desc(&[1.0, 0.0]);
        let b = desc(&[-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = desc(&[0.0, 0.0]);
        let b = desc(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_l2_normalized() {
        let a = desc(&[3.0, 4.0]).l2_normalized();
        assert!((a.values[0] - 0.6).abs() < 1e-6);
        assert!((a.values[1] - 0.8).abs() < 1e-6);
        assert_eq!(desc(&[0.0, 0.0]).l2_normalized().values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_bbox_scaled_truncates() {
        let b = BoundingBox::new(10, 20, 33, 47).scaled(2.0, 1.5);
        assert_eq!(b, BoundingBox::new(20, 30, 66, 70));
    }

    #[test]
    fn test_bbox_clamped_to_frame() {
        let b = BoundingBox::new(-5, -5, 700, 500).clamped(640, 480).unwrap();
        assert_eq!(b, BoundingBox::new(0, 0, 640, 480));
    }

    #[test]
    fn test_bbox_clamp_collapses_to_none() {
        // Entirely left of the frame
        assert!(BoundingBox::new(-50, 10, -20, 40).clamped(640, 480).is_none());
        // Degenerate input
        assert!(BoundingBox::new(30, 10, 30, 40).clamped(640, 480).is_none());
    }

    #[test]
    fn test_face_region_margin_clamped() {
        let region = BoundingBox::new(5, 100, 50, 150).face_region(10, 640, 480).unwrap();
        assert_eq!(region, BoundingBox::new(0, 90, 60, 160));
    }

    #[test]
    fn test_identity_round_trip_label() {
        assert_eq!(Identity::from("Unknown".to_string()), Identity::Unknown);
        assert_eq!(Identity::Known("ada".into()).label(), "ada");
        assert_eq!(Identity::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_result_serializes_flat() {
        let r = RecognitionResult {
            bbox: BoundingBox::new(1, 2, 3, 4),
            identity: Identity::Known("ada".into()),
            confidence: 0.5,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["name"], "ada");
        assert_eq!(json["box"]["x2"], 3);
        assert_eq!(json["confidence"], 0.5);
    }
}
