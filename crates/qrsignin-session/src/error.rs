//! Session error types

use qrsignin_core::protocol::CallableStatus;
use std::time::Duration;
use thiserror::Error;

/// Failure of a remote function call
#[derive(Debug, Clone, Error)]
pub enum RemoteCallError {
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote call transport error: {0}")]
    Transport(String),

    #[error("{message} ({status:?})")]
    Function {
        status: CallableStatus,
        message: String,
    },

    #[error("Invalid response from remote function: {0}")]
    InvalidResponse(String),
}

impl RemoteCallError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RemoteCallError::Timeout(timeout)
        } else if err.is_decode() {
            RemoteCallError::InvalidResponse(err.to_string())
        } else {
            RemoteCallError::Transport(err.to_string())
        }
    }
}

impl From<RemoteCallError> for qrsignin_core::Error {
    fn from(err: RemoteCallError) -> Self {
        qrsignin_core::Error::RemoteCallFailure(err.to_string())
    }
}

/// Failure of the identity provider's sign-in flow
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("Sign-in cancelled")]
    Cancelled,

    #[error("Sign-in failed: {0}")]
    Failed(String),
}
