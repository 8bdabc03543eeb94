//! QR Sign-In Auth - QR code token service
//!
//! Issues short-lived QR code tokens to web clients, authenticates them on
//! behalf of a signed-in scanning device and hands the web client a custom
//! sign-in token.
//!
//! # Sign-in Flow
//!
//! 1. The web client calls `QrTokenService::issue()` and renders the QR code
//! 2. A signed-in device scans it and calls `QrTokenService::authenticate()`
//! 3. The token is marked used and a custom token is stored next to it
//! 4. The web client polls `QrTokenService::custom_token()` and signs in
//!
//! # Example
//!
//! ```no_run
//! use qrsignin_auth::{QrTokenService, TokenServiceConfig, TokenStorage};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let storage = Arc::new(TokenStorage::new().await.unwrap());
//!     let service = QrTokenService::new(storage, TokenServiceConfig::default());
//!
//!     let issued = service.issue("203.0.113.7", None).await.unwrap();
//!     println!("Show this QR code: {}", issued.data_url());
//!
//!     // Later, from the scanning device's authenticated call
//!     service.authenticate(Some("uid-1"), &issued.token).await.unwrap();
//!     let ct = service.custom_token(&issued.token).await;
//!     println!("Custom token: {:?}", ct);
//! }
//! ```

pub mod custom;
pub mod qr;
pub mod service;
pub mod storage;
pub mod token;

pub use custom::{CustomTokenClaims, CustomTokenIssuer};
pub use qr::{render_png, PngDataUrl, QrImageOptions};
pub use service::{IssuedQrCode, QrTokenService, TokenError, TokenResult, TokenServiceConfig};
pub use storage::{StorageError, StorageResult, TokenStorage};
pub use token::{generate_token, is_token_shaped, QrTokenRecord, QR_TOKEN_LEN};
