//! QR Sign-In Core - Shared types and protocol definitions
//!
//! This crate provides the foundational types used by the scanner, the
//! session controller and the token service.

pub mod config;
pub mod error;
pub mod frame;
pub mod permission;
pub mod protocol;

pub use config::{AuthConfig, ScannerConfig, TieBreak};
pub use error::{Error, ErrorKind, Result};
pub use frame::{Frame, Orientation, PixelFormat, Point, Quad};
pub use permission::{Permission, PermissionSet, PermissionState};
