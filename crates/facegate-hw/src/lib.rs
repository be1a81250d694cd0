//! facegate-hw — Camera capture for the capture pipeline.
//!
//! Provides V4L2-based streaming into grayscale frames and on-demand
//! JPEG still extraction.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
