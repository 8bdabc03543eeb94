//! Preview and overlay surfaces bound to a camera session
//!
//! Drawing is out of scope; these traits are the contract the session relies
//! on. The frame processing pipeline is the only writer of the overlay.

use crate::device::CameraInfo;
use qrsignin_core::Quad;

/// Surface the camera preview is rendered to
pub trait PreviewTarget: Send + Sync {
    /// Bind the surface to a camera. Fails if the surface cannot be used.
    fn attach(&self, camera: &CameraInfo) -> std::io::Result<()>;

    /// Unbind the surface
    fn detach(&self);
}

/// Graphic overlay drawn above the preview
pub trait OverlayTarget: Send + Sync {
    /// Configure overlay geometry for the camera being previewed
    fn set_camera_info(&self, camera: &CameraInfo);

    /// Replace the drawn regions with those detected in a frame
    fn draw_detections(&self, frame_sequence: u64, regions: &[Quad]);

    /// Remove everything drawn
    fn clear(&self);
}

/// Headless surface that accepts everything and draws nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSurface;

impl PreviewTarget for NullSurface {
    fn attach(&self, _camera: &CameraInfo) -> std::io::Result<()> {
        Ok(())
    }

    fn detach(&self) {}
}

impl OverlayTarget for NullSurface {
    fn set_camera_info(&self, _camera: &CameraInfo) {}

    fn draw_detections(&self, _frame_sequence: u64, _regions: &[Quad]) {}

    fn clear(&self) {}
}
