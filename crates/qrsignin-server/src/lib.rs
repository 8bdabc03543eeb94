//! QR Sign-In Server - Axum-based HTTP endpoints for the token service
//!
//! Web clients fetch QR codes, cancel them and poll for their custom token;
//! signed-in devices call `authenticateQRCode` with the callable protocol.

pub mod http;
pub mod identity;
pub mod state;

pub use http::{create_router, serve};
pub use identity::{DevIdentity, IdentityVerifier, StaticTokens, DEV_UID};
pub use state::AppState;
