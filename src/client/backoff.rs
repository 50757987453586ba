//! Reconnect backoff policy.
//!
//! The default is a fixed 5 second delay. A multiplier above `1.0` turns it
//! into exponential backoff capped at `max_delay`. Retries never give up;
//! only `stop()` ends them.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default delay between a disconnect and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Delay schedule between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure. `1.0` is a fixed delay.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt.
    #[inline]
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Exponential backoff from `delay` up to `max_delay`.
    #[inline]
    #[must_use]
    pub fn exponential(delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            delay,
            max_delay,
            multiplier,
        }
    }

    /// Checks the policy is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero delay, a cap below the delay, or
    /// a multiplier below `1.0`.
    pub fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Err(Error::config("Reconnect delay must be > 0"));
        }
        if self.max_delay < self.delay {
            return Err(Error::config(
                "Max reconnect delay must be >= reconnect delay",
            ));
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(Error::config("Reconnect backoff multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let initial = self.delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let base = (initial * exponent).min(max);

        // Saturate at the cap when the product overflows `Duration`
        Duration::try_from_secs_f64(base.max(initial)).unwrap_or(self.max_delay)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_secs(5));
        assert_eq!(policy.next_delay(10), Duration::from_secs(5));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_exponential_grows_and_caps() {
        let policy =
            ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        assert_eq!(policy.next_delay(4), Duration::from_secs(10));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(ReconnectPolicy::fixed(Duration::ZERO).validate().is_err());
        assert!(
            ReconnectPolicy::exponential(Duration::from_secs(5), Duration::from_secs(1), 2.0)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(5), 0.5)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectPolicy::exponential(Duration::from_secs(1), Duration::from_secs(5), f64::NAN)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_huge_cap_saturates_instead_of_panicking() {
        let policy = ReconnectPolicy::exponential(
            Duration::from_secs(1),
            Duration::from_secs(u64::MAX),
            1e10,
        );
        assert!(policy.validate().is_ok());

        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
        assert_eq!(policy.next_delay(1), Duration::from_secs(10_000_000_000));
        assert_eq!(policy.next_delay(2), Duration::from_secs(u64::MAX));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(u64::MAX));
    }

    proptest! {
        #[test]
        fn prop_delay_stays_within_bounds(
            delay_ms in 1u64..10_000,
            extra_ms in 0u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let policy = ReconnectPolicy::exponential(
                Duration::from_millis(delay_ms),
                Duration::from_millis(delay_ms + extra_ms),
                multiplier,
            );
            prop_assert!(policy.validate().is_ok());

            let next = policy.next_delay(attempt);
            // Allow for float rounding at the edges
            prop_assert!(next + Duration::from_micros(1) >= policy.delay);
            prop_assert!(next <= policy.max_delay + Duration::from_micros(1));
        }
    }
}
