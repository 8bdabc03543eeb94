//! Configuration types for the scanner and the authentication client

use crate::permission::Permission;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which payload wins when a single frame decodes more than one barcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// First payload in detection order
    First,
    /// Last payload in detection order
    #[default]
    Last,
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(TieBreak::First),
            "last" => Ok(TieBreak::Last),
            _ => Err(format!("Invalid tie-break: {}. Use: first, last", s)),
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Frame rate requested from the camera
    pub fps: u32,
    /// Multi-barcode tie-break
    pub tie_break: TieBreak,
    /// Permissions that must be granted before the camera is opened
    pub required_permissions: Vec<Permission>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            tie_break: TieBreak::Last,
            required_permissions: Permission::required().to_vec(),
        }
    }
}

impl ScannerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Builder pattern: set tie-break
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Builder pattern: set required permissions
    pub fn with_required_permissions(mut self, permissions: Vec<Permission>) -> Self {
        self.required_permissions = permissions;
        self
    }

    /// Interval between two frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

/// Configuration of the remote authentication client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL the callable functions are served from
    pub endpoint: String,
    /// Name of the remote authentication procedure
    pub function_name: String,
    /// Upper bound on a single remote call, in milliseconds
    pub timeout_ms: u64,
    /// Length of the capture vibration, in milliseconds
    pub haptic_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            function_name: crate::protocol::AUTHENTICATE_QR_CODE.to_string(),
            timeout_ms: 15_000,
            haptic_ms: 250,
        }
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builder pattern: set call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn haptic_duration(&self) -> Duration {
        Duration::from_millis(self.haptic_ms)
    }

    /// Full URL of the authentication function
    pub fn function_url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.function_name
        )
    }
}
