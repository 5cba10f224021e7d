//! RGB buffer helpers shared by the ONNX backends.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// Copy a packed RGB8 buffer into an `RgbImage`.
///
/// Returns `None` when the buffer length does not match the dimensions.
pub fn to_image(rgb: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    if rgb.len() != width as usize * height as usize * 3 {
        return None;
    }
    RgbImage::from_raw(width, height, rgb.to_vec())
}

/// Bilinear resize to exactly `new_w × new_h`.
pub fn resize(img: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    if img.dimensions() == (new_w, new_h) {
        return img.clone();
    }
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}
