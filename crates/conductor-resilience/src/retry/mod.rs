//! Retry backoff calculation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base × (attempt + 1)`
    Linear,
    /// `base × 2^attempt`
    #[default]
    Exponential,
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Linear => write!(f, "linear"),
            Backoff::Exponential => write!(f, "exponential"),
        }
    }
}

/// Retry policy configuration.
///
/// `attempt` is zero-based: attempt 0 is the first failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff growth.
    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound for any single delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_delay_ms() -> u64 {
    3_600_000 // 1 hour
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            backoff: Backoff::Linear,
            max_delay_ms: 0,
        }
    }

    /// Creates an exponential backoff policy.
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: duration_millis(base_delay),
            backoff: Backoff::Exponential,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Creates a linear backoff policy.
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: duration_millis(base_delay),
            backoff: Backoff::Linear,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_millis(delay);
        self
    }

    /// Returns true if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before re-running after failed attempt number `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        compute_delay(self.base_delay_ms, self.backoff, attempt, self.max_delay_ms)
    }
}

/// `base × (exponential ? 2^attempt : attempt + 1)`, capped at `max_delay_ms`.
pub fn compute_delay(base_delay_ms: u64, backoff: Backoff, attempt: u32, max_delay_ms: u64) -> Duration {
    let factor: u64 = match backoff {
        Backoff::Exponential => 1u64.checked_shl(attempt).unwrap_or(u64::MAX),
        Backoff::Linear => u64::from(attempt) + 1,
    };
    let delay = base_delay_ms.saturating_mul(factor).min(max_delay_ms);
    Duration::from_millis(delay)
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::exponential(2, Duration::from_millis(100));

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(1000));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(3000));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let delay = compute_delay(1_000, Backoff::Exponential, 200, u64::MAX);
        assert_eq!(delay, Duration::from_millis(u64::MAX));
    }
}
