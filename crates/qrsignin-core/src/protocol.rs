//! Wire types shared by the scanning client and the token service
//!
//! The authentication procedure follows the callable-function convention:
//! the request body is `{"data": ...}` and the response is either
//! `{"result": ...}` or `{"error": {"status": ..., "message": ...}}`.

use serde::{Deserialize, Serialize};

/// Name of the remote authentication procedure
pub const AUTHENTICATE_QR_CODE: &str = "authenticateQRCode";

/// Envelope of a callable request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableRequest<T> {
    pub data: T,
}

/// Argument of the authentication procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    /// The scanned QR code token
    pub token: String,
}

/// Envelope of a callable response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallableResponse {
    Error { error: CallableError },
    Result { result: serde_json::Value },
}

/// Error status codes of the callable convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallableStatus {
    InvalidArgument,
    FailedPrecondition,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl CallableStatus {
    /// HTTP status code the service answers with
    pub fn http_status(&self) -> u16 {
        match self {
            CallableStatus::InvalidArgument | CallableStatus::FailedPrecondition => 400,
            CallableStatus::Unauthenticated => 401,
            CallableStatus::PermissionDenied => 403,
            CallableStatus::NotFound => 404,
            CallableStatus::DeadlineExceeded => 504,
            CallableStatus::Unavailable => 503,
            CallableStatus::Internal => 500,
        }
    }
}

/// Error body of a callable response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableError {
    pub status: CallableStatus,
    pub message: String,
}

impl CallableError {
    pub fn new(status: CallableStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Response of the QR code issuing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeResponse {
    /// PNG image as a `data:` URL
    pub qr: String,
    /// The issued QR code token
    pub token: String,
}

/// Request body of the cancellation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub token: String,
}

/// Custom sign-in token written once a QR code token is authenticated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ct: Option<String>,
}

/// Result of a cleanup run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}
