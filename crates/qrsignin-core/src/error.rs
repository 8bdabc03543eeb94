//! Error types for QR sign-in

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type shared across the scan and sign-in flow
#[derive(Error, Debug)]
pub enum Error {
    #[error("Camera unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Failed to start camera preview: {0}")]
    PreviewStartFailure(String),

    #[error("Barcode detection failed: {0}")]
    DetectionFailure(String),

    #[error("Remote call failed: {0}")]
    RemoteCallFailure(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Result type alias using the shared Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], cheap to copy into UI events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceUnavailable,
    PreviewStartFailure,
    DetectionFailure,
    RemoteCallFailure,
    PermissionDenied,
    Cancelled,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Error::PreviewStartFailure(_) => ErrorKind::PreviewStartFailure,
            Error::DetectionFailure(_) => ErrorKind::DetectionFailure,
            Error::RemoteCallFailure(_) => ErrorKind::RemoteCallFailure,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Whether a later user action (resume, re-prompt, re-scan) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PreviewStartFailure
                | ErrorKind::PermissionDenied
                | ErrorKind::RemoteCallFailure
        )
    }
}
