//! Frame sources: the [`CameraDevice`] trait and the V4L2 camera behind it.

use crate::frame::{self, Frame};
use crate::synthetic::SyntheticCamera;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const PREFERRED_SIZE: (u32, u32) = (640, 480);
const STREAM_BUFFERS: u32 = 4;
/// `/dev/video0` through `/dev/video15` are probed when listing.
const MAX_DEVICE_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device in use by another process: {0}")]
    Busy(String),
    #[error("not a video capture device: {0}")]
    NotCaptureDevice(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A capture device producing RGB frames. Closing is dropping.
pub trait CameraDevice: Send {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Negotiated (width, height); fixed for the lifetime of the handle.
    fn resolution(&self) -> (u32, u32);

    /// Device identifier for logging.
    fn name(&self) -> &str;
}

/// Open a camera by identifier.
///
/// Accepts a device path (`/dev/video0`), a bare index (`0` → `/dev/video0`)
/// or a synthetic source (`stub://640x480`).
pub fn open(camera_id: &str) -> Result<Box<dyn CameraDevice>, CameraError> {
    match camera_id.strip_prefix("stub://") {
        Some(size) => Ok(Box::new(SyntheticCamera::from_spec(size)?)),
        None => Ok(Box::new(Camera::open(&device_path(camera_id))?)),
    }
}

/// Resolve a camera identifier to a V4L2 device path.
pub fn device_path(camera_id: &str) -> String {
    let is_index = !camera_id.is_empty() && camera_id.bytes().all(|b| b.is_ascii_digit());
    if is_index {
        format!("/dev/video{camera_id}")
    } else {
        camera_id.to_owned()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera can hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, two bytes per pixel.
    Yuyv,
    /// 24-bit RGB.
    Rgb3,
    /// 8-bit luminance.
    Grey,
}

impl TryFrom<FourCC> for PixelFormat {
    type Error = CameraError;

    fn try_from(fourcc: FourCC) -> Result<Self, Self::Error> {
        match &fourcc.repr {
            b"YUYV" => Ok(Self::Yuyv),
            b"RGB3" => Ok(Self::Rgb3),
            b"GREY" => Ok(Self::Grey),
            _ => Err(CameraError::UnsupportedFormat(format!(
                "driver chose {fourcc}, expected YUYV, RGB3 or GREY"
            ))),
        }
    }
}

impl PixelFormat {
    /// Convert one raw buffer of `width`×`height` pixels to packed RGB.
    pub fn to_rgb(self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        let pixels = width as usize * height as usize;
        let short = |need: usize| {
            CameraError::CaptureFailed(format!("{self:?} buffer holds {} bytes, need {need}", raw.len()))
        };
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(raw, width, height)
                .map_err(|e| CameraError::CaptureFailed(e.to_string())),
            Self::Rgb3 => {
                let need = pixels * frame::RGB_CHANNELS;
                raw.get(..need).map(<[u8]>::to_vec).ok_or_else(|| short(need))
            }
            Self::Grey => raw.get(..pixels).map(frame::grey_to_rgb).ok_or_else(|| short(pixels)),
        }
    }
}

/// V4L2 camera streaming through memory-mapped buffers.
pub struct Camera {
    // Dropped before `_device`.
    stream: MmapStream<'static>,
    _device: Device,
    path: String,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    pub fn open(path: &str) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_owned()));
        }

        let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::Busy(path.to_owned()),
            _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
        })?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("{path}: querying capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(path.to_owned()));
        }

        let mut wanted = device
            .format()
            .map_err(|e| CameraError::UnsupportedFormat(format!("{path}: reading format: {e}")))?;
        (wanted.width, wanted.height) = PREFERRED_SIZE;
        wanted.fourcc = FourCC::new(b"YUYV");
        let got = device
            .set_format(&wanted)
            .map_err(|e| CameraError::UnsupportedFormat(format!("{path}: setting format: {e}")))?;
        let format = PixelFormat::try_from(got.fourcc)?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("{path}: mapping buffers: {e}")))?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = got.width,
            height = got.height,
            ?format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            _device: device,
            path: path.to_owned(),
            width: got.width,
            height: got.height,
            format,
        })
    }

    /// Probe `/dev/video*` for nodes that can capture video.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl CameraDevice for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let (raw, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("{}: dequeue: {e}", self.path)))?;
        let sequence = meta.sequence;
        let rgb = self.format.to_rgb(raw, self.width, self.height)?;
        Frame::new(rgb, self.width, self.height, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &str {
        &self.path
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.path, "closing camera");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_from_index() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("12"), "/dev/video12");
    }

    #[test]
    fn test_device_path_passthrough() {
        assert_eq!(device_path("/dev/video2"), "/dev/video2");
        assert_eq!(device_path(""), "");
    }

    #[test]
    fn test_open_missing_device() {
        let result = open("/dev/rollcall-does-not-exist");
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_stub() {
        let cam = open("stub://64x48").unwrap();
        assert_eq!(cam.resolution(), (64, 48));
        assert_eq!(cam.name(), "stub://64x48");
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::try_from(FourCC::new(b"YUYV")).unwrap(), PixelFormat::Yuyv);
        assert_eq!(PixelFormat::try_from(FourCC::new(b"GREY")).unwrap(), PixelFormat::Grey);
        assert!(matches!(
            PixelFormat::try_from(FourCC::new(b"MJPG")),
            Err(CameraError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_grey_expands_to_rgb() {
        let rgb = PixelFormat::Grey.to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_short_buffer_is_capture_failure() {
        let err = PixelFormat::Rgb3.to_rgb(&[0; 5], 2, 1).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }
}
