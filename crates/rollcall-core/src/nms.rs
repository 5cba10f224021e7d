//! Raw detector output and Non-Maximum Suppression.

use crate::types::BoundingBox;

/// A detector candidate in floating-point frame coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl Detection {
    /// Integer corner box, rounding outward.
    pub fn to_bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            (self.x + self.width).ceil() as i32,
            (self.y + self.height).ceil() as i32,
        )
    }
}

/// Greedy suppression: take the most confident box, drop everything that
/// overlaps it by more than `iou_threshold`, repeat.
///
/// Output is sorted by descending confidence.
pub fn nms(mut pending: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    pending.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    pending.reverse();

    let mut kept: Vec<Detection> = Vec::with_capacity(pending.len());
    while let Some(best) = pending.pop() {
        pending.retain(|other| iou(&best, other) <= iou_threshold);
        kept.push(best);
    }
    kept
}

/// Intersection-over-Union of two detections; 0 for degenerate boxes.
pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let right = |d: &Detection| d.x + d.width;
    let bottom = |d: &Detection| d.y + d.height;

    let overlap_w = (right(a).min(right(b)) - a.x.max(b.x)).max(0.0);
    let overlap_h = (bottom(a).min(bottom(b)) - a.y.max(b.y)).max(0.0);
    let shared = overlap_w * overlap_h;
    let combined = a.width * a.height + b.width * b.height - shared;

    if combined <= 0.0 {
        return 0.0;
    }
    shared / combined
}
