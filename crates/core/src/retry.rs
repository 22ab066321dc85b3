//! Exponential-backoff retry policy for unit tasks.
//!
//! A unit that fails with a retryable error goes back to its queue after
//! [`RetryPolicy::delay_for_attempt`]; once [`RetryPolicy::max_attempts`]
//! deliveries have failed, the failure is recorded and the unit is dropped.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for unit retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total deliveries allowed, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Stretch each delay by a random factor in `[1.0, 1.25)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether a unit whose `attempt`-th delivery (1-based) just failed may
    /// be delivered again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before the next delivery after the `attempt`-th one failed.
    ///
    /// `base * multiplier^(attempt - 1)`, clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let mut delay = Duration::from_millis(raw_ms.min(u64::MAX as f64) as u64).min(self.max_delay);

        if self.jitter {
            let factor: f64 = rand::rng().random_range(1.0..1.25);
            delay = Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
                .min(self.max_delay);
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn first_retry_uses_base_delay() {
        assert_eq!(fixed().delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn delay_doubles() {
        let policy = fixed();
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_clamps_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..fixed()
        };
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(30),
            ..fixed()
        };
        let expected = [1, 2, 4, 8, 16, 30, 30];
        for (i, &secs) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for_attempt(i as u32 + 1).as_secs(), secs);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for_attempt(2);
            assert!(d >= Duration::from_secs(2));
            assert!(d < Duration::from_millis(2500));
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = fixed();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
