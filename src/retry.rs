use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

pub const JOIN_RETRY_INITIAL_MS: u64 = 2_000;
pub const JOIN_RETRY_MULTIPLIER: f64 = 2.0;
pub const JOIN_RETRY_MAX_DELAY_MS: u64 = 60_000;
pub const JOIN_RETRY_MAX_ATTEMPTS: u32 = 10;

/// Bounded exponential backoff.
///
/// The pause after attempt `n` (1-based) is
/// `min(initial * multiplier^(n-1), max_delay)`. A multiplier of 1.0 gives a
/// fixed cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: JOIN_RETRY_INITIAL_MS,
            multiplier: JOIN_RETRY_MULTIPLIER,
            max_delay_ms: JOIN_RETRY_MAX_DELAY_MS,
            max_attempts: JOIN_RETRY_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "join_retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "join_retry.multiplier {} must be a finite value >= 1.0",
                self.multiplier
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_starts_at_two_seconds_and_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(32));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(6), Duration::from_secs(60));
        assert_eq!(policy.delay_after(40), Duration::from_secs(60));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_unit_multiplier_is_fixed_cadence() {
        let policy = RetryPolicy {
            multiplier: 1.0,
            ..RetryPolicy::default()
        };
        for attempt in 1..10 {
            assert_eq!(policy.delay_after(attempt), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
    }

    #[test]
    fn test_validate_rejects_zero_attempts_and_shrinking_delay() {
        let mut policy = RetryPolicy::default();
        policy.max_attempts = 0;
        assert!(policy.validate().is_err());

        let mut policy = RetryPolicy::default();
        policy.multiplier = 0.5;
        assert!(policy.validate().is_err());
    }
}
