//! rollcall-hw — Hardware abstraction for camera capture.
//!
//! Provides the `CameraDevice` capability, a V4L2 implementation, a
//! synthetic `stub://` source and RGB frame helpers.

pub mod camera;
pub mod frame;
pub mod synthetic;

pub use camera::{open, Camera, CameraDevice, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use synthetic::SyntheticCamera;
