//! QR Sign-In Capture - Camera resource management
//!
//! This crate owns the camera side of a scan session:
//! - [`CameraProvider`]/[`CameraDevice`] abstract the platform camera
//! - [`CameraResourceManager`] acquires and releases the exclusive
//!   [`CameraSession`] in step with the host screen's lifecycle
//! - [`frame_channel`] connects the capture thread to the frame processing
//!   pipeline with at most one frame in flight
//! - [`ImageDirectoryProvider`] replays image files as a camera

pub mod channel;
pub mod device;
pub mod error;
pub mod image_dir;
pub mod manager;
pub mod surface;

pub use channel::{frame_channel, FrameGate, FrameSink, FrameSource, FrameStats, PassPermit, SubmitOutcome};
pub use device::{CameraDevice, CameraInfo, CameraProvider};
pub use error::{CaptureError, CaptureResult};
pub use image_dir::{ImageDirectoryCamera, ImageDirectoryProvider};
pub use manager::{CameraResourceManager, CameraSession, SessionId};
pub use qrsignin_core::Frame;
pub use surface::{NullSurface, OverlayTarget, PreviewTarget};
