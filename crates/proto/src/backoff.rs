//! Exponential backoff for the broker health monitor's reconnect routine.
//!
//! Adapted from the Lazy Pirate pattern (zguide ch.4): retry with capped
//! exponential backoff rather than retrying immediately or giving up.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Ceiling on the computed delay, however many attempts have passed.
    pub max: Duration,
    /// Attempts allowed per reconnect cycle before giving up until the
    /// next scheduled probe.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry attempt `attempt` (1-indexed). `base * 2^(n-1)`,
    /// capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base.saturating_mul(multiplier);
        std::cmp::min(delay, self.max)
    }
}
