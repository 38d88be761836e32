//! Exponential backoff with bounded jitter for transient fetch failures.

use std::time::Duration;

use rand::Rng;
use sundew_shared::RetryConfig;

/// Upper bound (exclusive) of the random jitter added to every delay.
const JITTER_CEILING: Duration = Duration::from_secs(1);

/// Stateless retry-delay policy.
///
/// `delay = min(initial * 2^attempt + jitter, max_delay)` with jitter drawn
/// uniformly from `[0, 1s)`, until `attempt >= max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based), or `None` to give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..JITTER_CEILING);
        self.delay_with_jitter(attempt, jitter)
    }

    /// [`delay`](Self::delay) with a caller-chosen jitter term.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some((self.raw_delay(attempt) + jitter).min(self.max_delay))
    }

    /// `initial * 2^attempt`, saturating instead of overflowing.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor)
    }
}
