//! Retry policy for delivery operations.
//!
//! Two retry loops share one backoff curve:
//! - the inner loop retries a single provider `provider_attempts` times within
//!   one attempt cycle
//! - the outer loop re-queues a message after a failed attempt cycle until its
//!   `max_retries` ceiling is reached

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::retry::backoff_delay;

/// Retry policy configuration for delivery operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt cycles per message before it is marked failed.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Sends tried against one provider within a single attempt cycle.
    ///
    /// Default: 3
    #[serde(default = "defaults::provider_attempts")]
    pub provider_attempts: u32,

    /// Base delay for exponential backoff (milliseconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempt - 1)`
    ///
    /// Default: 1000
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay (milliseconds).
    ///
    /// Default: 30000
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor for randomizing delays, `0.0` keeps them exact.
    ///
    /// Values above `1.0` are clamped; negative, `NaN` and infinite values
    /// disable jitter.
    ///
    /// Default: 0.0
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            provider_attempts: defaults::provider_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-indexed).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.jitter_factor,
        )
    }

    /// Whether a message that failed `retry_count` cycles is attempted again.
    #[must_use]
    pub const fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Number of attempt cycles left, `0` once the ceiling is reached.
    #[must_use]
    pub const fn remaining_attempts(&self, retry_count: u32) -> u32 {
        self.max_retries.saturating_sub(retry_count)
    }

    /// Sends per provider per cycle, never less than one.
    #[must_use]
    pub fn provider_attempts(&self) -> u32 {
        self.provider_attempts.max(1)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        courier_common::message::DEFAULT_MAX_RETRIES
    }

    pub const fn provider_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1_000
    }

    pub const fn max_delay_ms() -> u64 {
        30_000 // 30 seconds
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.provider_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(policy.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.remaining_attempts(1), 2);
        assert_eq!(policy.remaining_attempts(5), 0);
    }

    #[test]
    fn test_backoff_follows_curve() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn test_nan_jitter_from_config_keeps_exact_backoff() {
        let policy: RetryPolicy = ron::from_str("(jitter_factor: NaN)").expect("Valid policy");

        assert!(policy.jitter_factor.is_nan());
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_provider_attempts_never_zero() {
        let policy = RetryPolicy {
            provider_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.provider_attempts(), 1);
    }
}
