//! Exponential backoff between attempts

use std::time::Duration;

use crate::config::RotationConfig;

/// Growth factor between consecutive backoff delays
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Exponential backoff without jitter
///
/// `delay(n) = base * 1.5^(n-1)`, where `n` is the 1-based number of attempts
/// made so far in the request. The key that failed does not matter. An
/// optional cap bounds a single delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_secs: f64,
    cap_secs: Option<f64>,
}

impl BackoffPolicy {
    /// Create a policy from a base delay and an optional cap (in seconds)
    pub fn new(base_secs: f64, cap_secs: Option<f64>) -> Self {
        Self {
            base_secs: base_secs.max(0.0),
            cap_secs: cap_secs.map(|c| c.max(0.0)),
        }
    }

    /// Create a policy from the rotation configuration
    pub fn from_config(config: &RotationConfig) -> Self {
        Self::new(config.base_backoff_secs, config.max_backoff_secs)
    }

    /// Delay to wait after `attempts` attempts have been made
    pub fn delay(&self, attempts: usize) -> Duration {
        if self.base_secs == 0.0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut secs = self.base_secs * BACKOFF_MULTIPLIER.powi(exponent);
        if let Some(cap) = self.cap_secs {
            secs = secs.min(cap);
        }

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}
