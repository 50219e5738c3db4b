//! Exponential backoff policy for successive recovery invocations.

use std::time::Duration;

use crate::config::RecoveryConfig;

/// Policy default for consecutive failed recoveries before giving up.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Pure backoff computation: `min(base * 2^(attempt - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStrategy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            MAX_RETRY_ATTEMPTS,
        )
    }
}

impl RecoveryStrategy {
    /// Construct a strategy. `max` is raised to `base` if smaller.
    #[must_use]
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts,
        }
    }

    /// Construct a strategy from the `[recovery]` configuration table.
    #[must_use]
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(
            Duration::from_secs(config.base_backoff_seconds),
            Duration::from_secs(config.max_backoff_seconds),
            config.max_retry_attempts,
        )
    }

    /// Consecutive failed recoveries tolerated before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before recovery `attempt` (1-based; 0 is treated as 1).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// [`backoff`](Self::backoff) in whole seconds.
    #[must_use]
    pub fn backoff_seconds(&self, attempt: u32) -> u64 {
        self.backoff(attempt).as_secs()
    }
}
