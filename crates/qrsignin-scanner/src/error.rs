//! Scanner error types

use qrsignin_capture::CaptureError;
use qrsignin_core::Permission;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Permissions not granted: {}", join(.0))]
    PermissionDenied(Vec<Permission>),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Scan session already finished")]
    Finished,
}

pub type ScanResult<T> = Result<T, ScanError>;

fn join(permissions: &[Permission]) -> String {
    permissions
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<ScanError> for qrsignin_core::Error {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Capture(e) => e.into(),
            ScanError::PermissionDenied(_) => qrsignin_core::Error::PermissionDenied(err.to_string()),
            ScanError::Detection(msg) => qrsignin_core::Error::DetectionFailure(msg),
            ScanError::Finished => qrsignin_core::Error::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrsignin_core::ErrorKind;

    #[test]
    fn test_permission_message_lists_missing() {
        let err = ScanError::PermissionDenied(vec![Permission::CAMERA, Permission::VIBRATE]);
        assert_eq!(
            err.to_string(),
            "Permissions not granted: android.permission.CAMERA, android.permission.VIBRATE"
        );
        let core: qrsignin_core::Error = err.into();
        assert_eq!(core.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_capture_errors_keep_their_kind() {
        let err: qrsignin_core::Error = ScanError::from(CaptureError::NoCameraHardware).into();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
    }
}
