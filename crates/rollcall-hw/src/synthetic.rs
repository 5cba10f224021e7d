//! Synthetic camera for `stub://` identifiers.
//!
//! Produces a moving square on a gradient at a fixed frame rate so the
//! pipeline can run without hardware.

use crate::camera::{CameraDevice, CameraError};
use crate::frame::{Frame, RGB_CHANNELS};
use std::time::{Duration, Instant};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const SYNTHETIC_FPS: u64 = 30;

pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    sequence: u32,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: format!("stub://{width}x{height}"),
            width,
            height,
            sequence: 0,
            last_frame_at: None,
        }
    }

    /// Parse the part after `stub://`: empty for the default size, or `WxH`.
    pub fn from_spec(spec: &str) -> Result<Self, CameraError> {
        if spec.is_empty() {
            return Ok(Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));
        }
        let (w, h) = spec
            .split_once('x')
            .ok_or_else(|| CameraError::DeviceNotFound(format!("stub://{spec}")))?;
        let width: u32 = w
            .parse()
            .map_err(|_| CameraError::DeviceNotFound(format!("stub://{spec}")))?;
        let height: u32 = h
            .parse()
            .map_err(|_| CameraError::DeviceNotFound(format!("stub://{spec}")))?;
        if width == 0 || height == 0 {
            return Err(CameraError::UnsupportedFormat(format!(
                "zero-sized synthetic frame: {spec}"
            )));
        }
        Ok(Self::new(width, height))
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let side = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(side).max(1);
        let sq_x = (self.sequence as usize * 4) % travel;
        let sq_y = (h - side.min(h)) / 2;

        let mut data = vec![0u8; w * h * RGB_CHANNELS];
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * RGB_CHANNELS;
                let inside = x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side;
                if inside {
                    data[i..i + RGB_CHANNELS].copy_from_slice(&[230, 190, 160]);
                } else {
                    data[i] = (x * 255 / w) as u8;
                    data[i + 1] = (y * 255 / h) as u8;
                    data[i + 2] = 96;
                }
            }
        }
        data
    }
}

impl CameraDevice for SyntheticCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let period = Duration::from_millis(1000 / SYNTHETIC_FPS);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());

        let data = self.render();
        let frame = Frame::new(data, self.width, self.height, self.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_default() {
        let cam = SyntheticCamera::from_spec("").unwrap();
        assert_eq!(cam.resolution(), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[test]
    fn test_from_spec_rejects_garbage() {
        assert!(SyntheticCamera::from_spec("wide").is_err());
        assert!(SyntheticCamera::from_spec("0x10").is_err());
        assert!(SyntheticCamera::from_spec("10xabc").is_err());
    }

    #[test]
    fn test_frames_are_sequenced() {
        let mut cam = SyntheticCamera::new(32, 24);
        let a = cam.read_frame().unwrap();
        let b = cam.read_frame().unwrap();
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(a.data.len(), 32 * 24 * 3);
        assert_ne!(a.data, b.data, "square should move between frames");
    }
}
