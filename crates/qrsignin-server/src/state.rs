//! Shared application state

use crate::identity::IdentityVerifier;
use qrsignin_auth::QrTokenService;
use std::sync::Arc;

/// State shared by all handlers
pub struct AppState {
    /// Token service behind every endpoint
    pub service: Arc<QrTokenService>,
    /// Identifies callers of the authentication endpoint
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(service: Arc<QrTokenService>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { service, verifier }
    }
}
