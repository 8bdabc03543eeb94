//! QR Sign-In Scanner - Barcode detection and scan result handoff
//!
//! This crate turns a stream of camera frames into at most one scanned token:
//! - [`BarcodeDetector`] decodes barcodes from a single frame ([`QrDetector`]
//!   is backed by rqrr)
//! - [`FrameProcessingPipeline`] runs detection off the caller's thread with
//!   one pass in flight and stops after the first accepted payload
//! - [`ScanResultHandoff`] validates payloads and delivers exactly one
//!   [`ScanOutcome`] to whoever launched the scan
//! - [`ScannerScreen`] binds the camera and the pipeline to a host lifecycle

pub mod detector;
pub mod error;
pub mod handoff;
pub mod pipeline;
pub mod screen;

pub use detector::{Barcode, BarcodeDetector, DetectionResult, QrDetector};
pub use error::{ScanError, ScanResult};
pub use handoff::{
    AcceptAll, PrefixLengthPolicy, RequestId, ScanOutcome, ScanResultHandoff, ValidationPolicy,
};
pub use pipeline::{FrameProcessingPipeline, PipelineHandle, PipelineState, PipelineStats, StatsSnapshot};
pub use screen::{
    GrantAll, PermissionHost, ScanCanceller, ScanLauncher, ScannerScreen, ScreenHandle,
    ScreenLauncher, ScreenState,
};
