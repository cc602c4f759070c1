//! Exponential backoff with an optional jitter

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt`
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
///
/// # Arguments
/// * `attempt` - The attempt number (1-indexed, `0` is treated as `1`)
/// * `base_delay` - Delay before the first retry
/// * `max_delay` - Upper bound before jitter is applied
/// * `jitter_factor` - Jitter factor (e.g., 0.2 for ±20%), `0.0` disables it.
///   Clamped to `1.0`; a negative or non-finite factor disables it.
pub fn backoff_delay(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
) -> Duration {
    // 2^31 already exceeds any sensible cap, saturate rather than overflow
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = base_delay.saturating_mul(1 << exponent).min(max_delay);

    if !jitter_factor.is_finite() || jitter_factor <= 0.0 {
        return delay;
    }
    let jitter_factor = jitter_factor.min(1.0);

    let delay_secs = delay.as_secs_f64();
    let jitter_range = delay_secs * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((delay_secs + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn test_exponential_backoff_calculation() {
        assert_eq!(backoff_delay(1, BASE, MAX, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, BASE, MAX, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, BASE, MAX, 0.0), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, BASE, MAX, 0.0), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(6, BASE, MAX, 0.0), MAX);
        assert_eq!(backoff_delay(64, BASE, MAX, 0.0), MAX);
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX, 0.0), MAX);
    }

    #[test]
    fn test_attempt_zero_uses_base_delay() {
        assert_eq!(backoff_delay(0, BASE, MAX, 0.0), BASE);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let delay = backoff_delay(3, BASE, MAX, 0.25);
            assert!(delay >= Duration::from_secs(3));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_non_finite_jitter_is_ignored() {
        assert_eq!(backoff_delay(2, BASE, MAX, f64::NAN), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, BASE, MAX, f64::INFINITY), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, BASE, MAX, -0.5), Duration::from_secs(2));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    fn test_oversized_jitter_is_clamped() {
        for _ in 0..100 {
            let delay = backoff_delay(1, BASE, MAX, 1e300);
            assert!(delay <= Duration::from_secs(2));
        }
    }
}
