//! Retry backoff for drains halted by a retryable provider failure.
//!
//! The delay before the retry drain scheduled from attempt `n` is
//! `ceil((growth^n - 1) * scale_secs)` seconds. The attempt counter saturates
//! at `max_attempt`, which therefore also caps the delay: there is no wall
//! clock cap and no limit on the number of retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy for retry drains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base of the exponential
    #[serde(default = "default_growth")]
    pub growth: f64,

    /// Scale factor applied to `growth^attempt - 1`, in seconds
    #[serde(default = "default_scale_secs")]
    pub scale_secs: f64,

    /// Ceiling of the attempt counter
    #[serde(default = "default_max_attempt")]
    pub max_attempt: u32,
}

impl RetryPolicy {
    /// Delay before the retry drain scheduled by a drain running `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.min(self.max_attempt);
        let secs = ((self.growth.powi(attempt as i32) - 1.0) * self.scale_secs).ceil();
        Duration::from_secs(secs.max(0.0) as u64)
    }

    /// Attempt number carried by the next retry message
    pub fn next_attempt(&self, attempt: u32) -> u32 {
        attempt.saturating_add(1).min(self.max_attempt)
    }

    /// Largest delay this policy can produce
    pub fn max_delay(&self) -> Duration {
        self.delay(self.max_attempt)
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.growth.is_finite() || self.growth < 1.0 {
            return Err(crate::Error::config("retry growth must be a finite number >= 1"));
        }
        if !self.scale_secs.is_finite() || self.scale_secs < 0.0 {
            return Err(crate::Error::config(
                "retry scale_secs must be a finite number >= 0",
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            growth: default_growth(),
            scale_secs: default_scale_secs(),
            max_attempt: default_max_attempt(),
        }
    }
}

fn default_growth() -> f64 {
    1.4
}

fn default_scale_secs() -> f64 {
    25.0
}

fn default_max_attempt() -> u32 {
    7
}
