//! Overlay rendering and JPEG encoding for published frames.
//!
//! Each face gets a box (green known, red unknown), a filled tab above it
//! carrying the name and a confidence bar plus value below it. Two HUD strips
//! in the top-left corner show the detected count and the publish rate.
//! Without a font the text is replaced by gauges: one marker per face and an
//! FPS bar.

use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageError, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::{BoundingBox, RecognitionResult};
use rollcall_hw::Frame;
use std::path::Path;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const HUD_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const HUD_FOREGROUND: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([0, 0, 0]);

const BOX_THICKNESS: i32 = 3;
const LABEL_TAB_HEIGHT: i32 = 18;
const CONFIDENCE_BAR_GAP: i32 = 4;
const CONFIDENCE_BAR_HEIGHT: i32 = 6;
const LABEL_SCALE: f32 = 16.0;
const HUD_SCALE: f32 = 20.0;

/// Detected-count strip.
const COUNT_STRIP: BoundingBox = BoundingBox { x1: 10, y1: 10, x2: 250, y2: 40 };
/// Publish-rate strip.
const FPS_STRIP: BoundingBox = BoundingBox { x1: 10, y1: 50, x2: 150, y2: 80 };
/// Gauge fill reaches the end of the strip at this rate.
const FPS_FULL_SCALE: f32 = 30.0;
const COUNT_MARKER: i32 = 20;
const STRIP_PADDING: i32 = 5;

/// Fonts tried when none is configured.
pub const FONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
];

/// Draws result overlays and the HUD onto frames.
#[derive(Clone, Default)]
pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Load the font at `path`, or the first readable entry of
    /// [`FONT_SEARCH_PATHS`] when no path is given.
    pub fn load(path: Option<&Path>) -> Self {
        let font = match path {
            Some(p) => read_font(p),
            None => FONT_SEARCH_PATHS.iter().find_map(|p| read_font(Path::new(p))),
        };
        if font.is_none() {
            tracing::warn!(configured = ?path, "no overlay font found; drawing gauges instead of text");
        }
        Self { font }
    }

    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// Draw result overlays and HUD onto a copy of `frame`.
    pub fn annotate(&self, frame: &Frame, results: &[RecognitionResult], fps: f32) -> Option<RgbImage> {
        let mut img = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())?;
        self.draw_hud(&mut img, results.len(), fps);
        for r in results {
            self.draw_result(&mut img, r);
        }
        Some(img)
    }

    fn draw_hud(&self, img: &mut RgbImage, detected: usize, fps: f32) {
        fill(img, COUNT_STRIP, HUD_BACKGROUND);
        fill(img, FPS_STRIP, HUD_BACKGROUND);
        let (text_x, text_y) = (COUNT_STRIP.x1 + STRIP_PADDING, COUNT_STRIP.y1 + STRIP_PADDING);

        if let Some(font) = &self.font {
            let scale = PxScale::from(HUD_SCALE);
            let count = format!("People detected: {detected}");
            draw_text_mut(img, HUD_FOREGROUND, text_x, text_y, scale, font, &count);
            let rate = format!("FPS: {fps:.1}");
            let y = FPS_STRIP.y1 + STRIP_PADDING;
            draw_text_mut(img, HUD_FOREGROUND, text_x, y, scale, font, &rate);
            return;
        }

        let per_marker = COUNT_MARKER + STRIP_PADDING;
        let capacity = (COUNT_STRIP.width() - STRIP_PADDING) / per_marker;
        for i in 0..(detected as i32).min(capacity) {
            let x1 = text_x + i * per_marker;
            let marker = BoundingBox::new(x1, text_y, x1 + COUNT_MARKER, text_y + COUNT_MARKER);
            fill(img, marker, HUD_FOREGROUND);
        }

        let inner = FPS_STRIP.width() - 2 * STRIP_PADDING;
        let len = (inner as f32 * (fps / FPS_FULL_SCALE).clamp(0.0, 1.0)) as i32;
        let x1 = FPS_STRIP.x1 + STRIP_PADDING;
        let bar = BoundingBox::new(x1, FPS_STRIP.y1 + STRIP_PADDING, x1 + len, FPS_STRIP.y2 - STRIP_PADDING);
        fill(img, bar, HUD_FOREGROUND);
    }

    fn draw_result(&self, img: &mut RgbImage, r: &RecognitionResult) {
        let color = if r.identity.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
        let b = r.bbox;

        for inset in 0..BOX_THICKNESS {
            if let Some(edge) = rect(BoundingBox::new(b.x1 + inset, b.y1 + inset, b.x2 - inset, b.y2 - inset)) {
                draw_hollow_rect_mut(img, edge, color);
            }
        }

        let tab = BoundingBox::new(b.x1, b.y1 - LABEL_TAB_HEIGHT, b.x2, b.y1);
        fill(img, tab, color);

        let bar_y = b.y2 + CONFIDENCE_BAR_GAP;
        let len = (b.width() as f32 * r.confidence.clamp(0.0, 1.0)) as i32;
        fill(img, BoundingBox::new(b.x1, bar_y, b.x1 + len, bar_y + CONFIDENCE_BAR_HEIGHT), color);

        if let Some(font) = &self.font {
            let scale = PxScale::from(LABEL_SCALE);
            draw_text_mut(img, LABEL_TEXT, b.x1 + 2, tab.y1 + 1, scale, font, r.identity.label());
            let value = format!("Confidence: {:.2}", r.confidence);
            let y = bar_y + CONFIDENCE_BAR_HEIGHT + 2;
            draw_text_mut(img, color, b.x1, y, scale, font, &value);
        }
    }
}

fn read_font(path: &Path) -> Option<FontArc> {
    let bytes = std::fs::read(path).ok()?;
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            tracing::debug!(path = %path.display(), "overlay font loaded");
            Some(font)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable overlay font");
            None
        }
    }
}

/// `[x1, x2) × [y1, y2)` as an imageproc rectangle; `None` when empty.
fn rect(b: BoundingBox) -> Option<Rect> {
    (b.width() > 0 && b.height() > 0).then(|| Rect::at(b.x1, b.y1).of_size(b.width() as u32, b.height() as u32))
}

/// Fill `b`, clipped to the image by imageproc.
fn fill(img: &mut RgbImage, b: BoundingBox, color: Rgb<u8>) {
    if let Some(r) = rect(b) {
        draw_filled_rect_mut(img, r, color);
    }
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Identity;

    const GREY: Rgb<u8> = Rgb([128, 128, 128]);

    fn grey_frame(w: u32, h: u32) -> Frame {
        Frame::new(vec![128; (w * h * 3) as usize], w, h, 0).unwrap()
    }

    fn result(b: BoundingBox, identity: Identity, confidence: f32) -> RecognitionResult {
        RecognitionResult {
            bbox: b,
            identity,
            confidence,
        }
    }

    /// A font from the host, if it has one of the usual ones.
    fn system_overlay() -> Option<Overlay> {
        let overlay = Overlay::load(None);
        overlay.has_text().then_some(overlay)
    }

    #[test]
    fn test_box_colors() {
        let frame = grey_frame(320, 240);
        let results = [
            result(BoundingBox::new(100, 100, 150, 150), Identity::Known("ada".into()), 0.8),
            result(BoundingBox::new(200, 100, 250, 150), Identity::Unknown, 0.0),
        ];
        let img = Overlay::default().annotate(&frame, &results, 0.0).unwrap();
        assert_eq!(*img.get_pixel(100, 120), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(102, 120), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(249, 120), UNKNOWN_COLOR);
        // Interior untouched
        assert_eq!(*img.get_pixel(125, 125), GREY);
        assert_eq!(*img.get_pixel(103, 125), GREY);
    }

    #[test]
    fn test_confidence_bar_length() {
        let frame = grey_frame(320, 240);
        let b = BoundingBox::new(100, 100, 200, 150);
        let img = Overlay::default()
            .annotate(&frame, &[result(b, Identity::Known("ada".into()), 0.5)], 0.0)
            .unwrap();
        let y = (b.y2 + CONFIDENCE_BAR_GAP + 1) as u32;
        assert_eq!(*img.get_pixel(149, y), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(151, y), GREY);
    }

    #[test]
    fn test_hud_gauges_without_font() {
        let frame = grey_frame(320, 240);
        let img = Overlay::default().annotate(&frame, &[], 30.0).unwrap();
        // Empty count strip is all background
        assert_eq!(*img.get_pixel(20, 20), HUD_BACKGROUND);
        // Full-scale fps fills the strip interior
        assert_eq!(*img.get_pixel(140, 65), HUD_FOREGROUND);
    }

    #[test]
    fn test_text_drawn_when_font_available() {
        let Some(overlay) = system_overlay() else {
            return;
        };
        let frame = grey_frame(320, 240);
        let b = BoundingBox::new(100, 100, 220, 180);
        let img = overlay
            .annotate(&frame, &[result(b, Identity::Known("ada".into()), 0.9)], 12.5)
            .unwrap();

        let strip_has_text = (COUNT_STRIP.x1..COUNT_STRIP.x2)
            .flat_map(|x| (COUNT_STRIP.y1..COUNT_STRIP.y2).map(move |y| (x, y)))
            .any(|(x, y)| *img.get_pixel(x as u32, y as u32) != HUD_BACKGROUND);
        assert!(strip_has_text, "detected count is written into the HUD");

        let tab_has_name = (b.x1..b.x2)
            .flat_map(|x| (b.y1 - LABEL_TAB_HEIGHT..b.y1).map(move |y| (x, y)))
            .any(|(x, y)| *img.get_pixel(x as u32, y as u32) != KNOWN_COLOR);
        assert!(tab_has_name, "name is written into the label tab");

        // Text replaces the marker gauges
        assert_eq!(*img.get_pixel(245, 30), HUD_BACKGROUND);
    }

    #[test]
    fn test_missing_font_path_falls_back_to_gauges() {
        let overlay = Overlay::load(Some(Path::new("/nonexistent/rollcall.ttf")));
        assert!(!overlay.has_text());
    }

    #[test]
    fn test_boxes_outside_frame_are_clipped() {
        let frame = grey_frame(64, 48);
        let results = [result(BoundingBox::new(-20, -20, 500, 500), Identity::Unknown, 1.0)];
        assert!(Overlay::default().annotate(&frame, &results, 100.0).is_some());
        let degenerate = [result(BoundingBox::new(10, 10, 10, 30), Identity::Unknown, 1.0)];
        assert!(Overlay::default().annotate(&frame, &degenerate, 0.0).is_some());
    }

    #[test]
    fn test_encode_jpeg() {
        let img = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&img, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }
}
