//! Bounded exponential backoff for the relay loop.
//!
//! The delay doubles from the poll interval with each consecutive failure and
//! saturates at a ceiling, so a long vendor outage never turns into a tight
//! retry loop against either API.

use std::time::Duration;

/// Default backoff ceiling (5 minutes)
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Exponent cap; 2^16 times any sane base is already past the ceiling
const MAX_EXPONENT: u32 = 16;

/// Backoff policy: `min(base * 2^(failures - 1), max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self { base, max }
    }

    /// Delay before retrying after `consecutive_failures` failures in a row
    ///
    /// Zero failures means no backoff. Non-decreasing in the failure count.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (consecutive_failures - 1).min(MAX_EXPONENT);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
