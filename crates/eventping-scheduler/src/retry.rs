use std::time::Duration;

use eventping_channels::jitter;
use eventping_core::config::SchedulerConfig;

/// Bounded exponential backoff for retryable delivery failures.
///
/// Attempt `n` (1-based) that fails is retried after
/// `min(base * 2^(n-1), max)` plus jitter, or later if the provider asked
/// for a longer pause. After `max_attempts` attempts the job is terminal.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_secs(cfg.backoff_base_secs),
            max: Duration::from_secs(cfg.backoff_max_secs.max(cfg.backoff_base_secs)),
        }
    }

    /// `true` once `attempts` sends have been made and no more are allowed.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the next try, without jitter.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempts.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next try: backoff plus jitter, never shorter than
    /// the provider's `retry_after`.
    pub fn delay(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempts);
        let delay = backoff + jitter(backoff);
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
