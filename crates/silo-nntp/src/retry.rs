//! Retry backoff policy
//!
//! Transient failures retry with `min(base * 2^attempt, cap)` plus
//! jitter, bounded by a maximum attempt count. Jitter keeps a fleet of
//! workers from thundering back in lockstep after an upstream hiccup.

use rand::Rng;
use std::time::Duration;

use silo_core::config::RetrySettings;

/// Exponential backoff with jitter
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            Duration::from_millis(settings.retry_backoff_base_ms),
            Duration::from_millis(settings.retry_backoff_cap_ms),
            settings.upload_retries_max,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` failures exhaust the budget
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Deterministic backoff component for one attempt (0-based)
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let shifted = self
            .base
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(self.cap);
        shifted.min(self.cap)
    }

    /// Backoff plus up to 25% jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        let jitter_budget = raw.as_millis() as u64 / 4;
        let jitter = if jitter_budget == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_budget)
        };
        raw + Duration::from_millis(jitter)
    }
}
