//! Reconnect backoff.

use std::time::Duration;

use croupier_core::HotReloadConfig;

/// Growth factor applied to the delay after each failed attempt.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Upper bound for any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay to wait after failed attempt number `attempt` (1-based):
/// `min(initial * 1.5^(attempt-1), 60s)`.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = initial.as_secs_f64() * BACKOFF_MULTIPLIER.powi(exponent);

    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// Attempt budget and initial delay of one recovery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    pub fn from_config(config: &HotReloadConfig) -> Self {
        Self::new(config.max_retry_attempts, config.reconnect_delay())
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial_delay, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HotReloadConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let initial = Duration::from_secs(5);
        assert_eq!(backoff_delay(initial, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(initial, 2), Duration::from_millis(7500));
        assert_eq!(backoff_delay(initial, 3), Duration::from_millis(11250));
    }

    #[test]
    fn test_backoff_caps_at_sixty_seconds() {
        let initial = Duration::from_secs(5);
        assert_eq!(backoff_delay(initial, 8), MAX_BACKOFF);
        assert_eq!(backoff_delay(initial, u32::MAX), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::from_secs(90), 1), MAX_BACKOFF);
    }

    #[test]
    fn test_zero_initial_delay_stays_zero() {
        assert_eq!(backoff_delay(Duration::ZERO, 5), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_millis(7500));
    }
}
