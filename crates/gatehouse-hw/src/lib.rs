//! gatehouse-hw — Hardware abstraction for camera capture and frame annotation.
//!
//! Provides V4L2-based colour capture and the drawing/encoding helpers the
//! frame pipeline uses for its video output.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::{BoxStyle, Frame, FrameError};
