//! Frame type and pixel conversions: YUYV/GREY to RGB, resize, crop.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Bytes per packed RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

/// A captured camera frame in packed RGB8.
///
/// Frames are moved between pipeline stages by value; a stage that needs to
/// keep a frame while forwarding it clones it.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an RGB buffer, checking its length against the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// Resize with a triangle (bilinear) filter, the same one the detector
    /// and embedder preprocessing use. Sequence is kept.
    ///
    /// Returns `None` if `data` no longer matches the dimensions.
    pub fn resized(&self, new_w: u32, new_h: u32) -> Option<Frame> {
        let view: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())?;
        let data = imageops::resize(&view, new_w, new_h, FilterType::Triangle).into_raw();
        Some(Frame {
            data,
            width: new_w,
            height: new_h,
            sequence: self.sequence,
        })
    }

    /// Copy out the half-open pixel rectangle `[x1, x2) × [y1, y2)`.
    ///
    /// Returns `None` when the rectangle is empty or reaches outside the frame.
    pub fn crop(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Frame> {
        if x1 >= x2 || y1 >= y2 || x2 > self.width || y2 > self.height {
            return None;
        }
        let w = (x2 - x1) as usize;
        let h = (y2 - y1) as usize;
        let stride = self.width as usize * RGB_CHANNELS;
        let mut data = Vec::with_capacity(w * h * RGB_CHANNELS);
        for y in y1 as usize..y2 as usize {
            let start = y * stride + x1 as usize * RGB_CHANNELS;
            data.extend_from_slice(&self.data[start..start + w * RGB_CHANNELS]);
        }
        Some(Frame {
            data,
            width: w as u32,
            height: h as u32,
            sequence: self.sequence,
        })
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * RGB_CHANNELS
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 full-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Replicate an 8-bit grayscale buffer into RGB8.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&p| [p, p, p]).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        Frame::new(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_frame_new_rejects_bad_length() {
        let result = Frame::new(vec![0u8; 10], 2, 2, 0);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 12, actual: 10 })
        ));
    }

    #[test]
    fn test_yuyv_grey_pixels() {
        // Neutral chroma → R = G = B = Y
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[1, 2]), vec![1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_crop_copies_region() {
        let frame = gradient(8, 6);
        let crop = frame.crop(2, 1, 5, 4).unwrap();
        assert_eq!((crop.width, crop.height), (3, 3));
        // Top-left of crop is source pixel (2, 1)
        assert_eq!(&crop.data[0..3], &[2, 1, 7]);
        // Bottom-right of crop is source pixel (4, 3)
        let last = crop.data.len() - 3;
        assert_eq!(&crop.data[last..], &[4, 3, 7]);
    }

    #[test]
    fn test_crop_rejects_empty_or_out_of_bounds() {
        let frame = gradient(8, 6);
        assert!(frame.crop(3, 1, 3, 4).is_none());
        assert!(frame.crop(0, 0, 9, 4).is_none());
        assert!(frame.crop(5, 4, 2, 1).is_none());
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let frame = Frame::new(vec![128u8; 100 * 80 * 3], 100, 80, 3).unwrap();
        let small = frame.resized(32, 24).unwrap();
        assert_eq!(small.data.len(), 32 * 24 * 3);
        assert_eq!(small.sequence, 3);
        assert!(small.data.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_keeps_gradient_direction() {
        let small = gradient(64, 48).resized(16, 12).unwrap();
        assert_eq!((small.width, small.height), (16, 12));
        let red = |x: usize, y: usize| small.data[(y * 16 + x) * RGB_CHANNELS];
        assert!(red(0, 5) < red(8, 5) && red(8, 5) < red(15, 5));
    }

    #[test]
    fn test_resize_rejects_mismatched_buffer() {
        let mut frame = gradient(8, 6);
        frame.data.truncate(10);
        assert!(frame.resized(4, 3).is_none());
    }
}
