//! Haptic feedback boundary

use std::time::Duration;
use tracing::info;

/// Host vibration service
pub trait Haptics: Send + Sync {
    fn vibrate(&self, duration: Duration);
}

/// Haptics for hosts without a vibrator: the pulse is logged
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn vibrate(&self, duration: Duration) {
        info!("Vibrate {} ms", duration.as_millis());
    }
}
