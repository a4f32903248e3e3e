//! Backoff for failed job attempts.

use std::time::Duration;

use chrono::{DateTime, Utc};

use closet_core::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// base * 2^(attempt - 1), capped.
    Exponential,
}

/// When a failed job becomes available again. The attempt budget itself lives
/// on the job (`max_attempts`).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0), applied symmetrically around the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(5 * 60))
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay after the `attempt`-th failure (1-indexed).
    ///
    /// Jitter is derived from `salt`, so the same job and attempt always get
    /// the same delay while different jobs spread out.
    pub fn delay_for_attempt(&self, attempt: u32, salt: u64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = (u64::from(attempt).wrapping_mul(17).wrapping_add(salt) % 100) as f64 / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Absolute retry time for `job_id` after its `attempt`-th failure.
    pub fn retry_at(&self, job_id: JobId, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let salt = job_id.as_uuid().as_u128() as u64;
        let delay = self.delay_for_attempt(attempt, salt);
        now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
    }
}
