//! Camera device abstraction
//!
//! A [`CameraProvider`] hands out at most one open [`CameraDevice`] at a time.
//! The device is driven from a dedicated capture thread once its preview has
//! started, so implementations may block in [`CameraDevice::next_frame`].

use crate::error::CaptureResult;
use crate::surface::PreviewTarget;
use qrsignin_core::{Frame, Orientation};

/// Static description of an opened camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Platform identifier of the camera
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Native frame rate
    pub fps: u32,
    /// Sensor orientation
    pub orientation: Orientation,
}

impl CameraInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            width,
            height,
            fps,
            orientation: Orientation::Deg0,
        }
    }
}

/// An open camera device
pub trait CameraDevice: Send + 'static {
    /// Description of this camera
    fn info(&self) -> &CameraInfo;

    /// Bind the preview surface and start streaming
    fn start_preview(&mut self, preview: &dyn PreviewTarget) -> std::io::Result<()>;

    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` once the device will not produce further frames.
    fn next_frame(&mut self) -> CaptureResult<Option<Frame>>;

    /// Stop streaming. The device is closed when dropped.
    fn stop_preview(&mut self);
}

/// Source of camera devices
pub trait CameraProvider: Send + Sync {
    /// Number of cameras present on this host
    fn camera_count(&self) -> usize;

    /// Open the default camera, claiming it exclusively
    fn open(&self) -> CaptureResult<Box<dyn CameraDevice>>;
}
