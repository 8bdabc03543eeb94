//! Capture error types

use thiserror::Error;

/// Errors raised while acquiring or running a camera session
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No camera hardware available")]
    NoCameraHardware,

    #[error("Camera already in use: {0}")]
    CameraInUse(String),

    #[error("A camera session is already open")]
    SessionActive,

    #[error("No camera session acquired")]
    NotAcquired,

    #[error("Failed to start preview: {0}")]
    PreviewStart(#[source] std::io::Error),

    #[error("Camera device error: {0}")]
    Device(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

impl From<CaptureError> for qrsignin_core::Error {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NoCameraHardware
            | CaptureError::CameraInUse(_)
            | CaptureError::SessionActive => {
                qrsignin_core::Error::ResourceUnavailable(err.to_string())
            }
            CaptureError::PreviewStart(e) => qrsignin_core::Error::PreviewStartFailure(e.to_string()),
            CaptureError::NotAcquired | CaptureError::Device(_) => {
                qrsignin_core::Error::Other(err.to_string())
            }
        }
    }
}
