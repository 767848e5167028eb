//! Retry policy and exponential backoff.
//!
//! The backoff sequence follows `base * multiplier^n` with randomized
//! jitter, clamped to a maximum delay, per the
//! [gRPC connection backoff specification](https://github.com/grpc/grpc/blob/master/doc/connection-backoff.md).

use std::time::Duration;

/// Default configuration values based on the gRPC connection backoff spec.
pub mod defaults {
    use std::time::Duration;

    /// Default initial delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    /// Default multiplier for exponential backoff.
    pub const MULTIPLIER: f64 = 1.6;

    /// Default jitter factor (0.2 means +/- 20%).
    pub const JITTER: f64 = 0.2;

    /// Default maximum delay between retries.
    pub const MAX_DELAY: Duration = Duration::from_secs(120);

    /// Default maximum number of attempts, including the first.
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// Configuration for retry behavior.
///
/// # Example
///
/// ```
/// use opflow_client::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Initial delay before the first retry.
    pub base_delay: Duration,

    /// Multiplier for exponential backoff. Must be >= 1.0.
    pub multiplier: f64,

    /// Jitter factor between 0.0 and 1.0. A value of 0.2 means the actual
    /// delay falls within +/- 20% of the calculated delay.
    pub jitter: f64,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            max_delay: defaults::MAX_DELAY,
            max_attempts: defaults::MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries (a single attempt).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the maximum number of attempts, including the initial one.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be >= 1");
        self.max_attempts = max_attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// # Panics
    ///
    /// Panics if `multiplier` is less than 1.0.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        assert!(multiplier >= 1.0, "multiplier must be >= 1.0");
        self.multiplier = multiplier;
        self
    }

    /// # Panics
    ///
    /// Panics if `jitter` is not between 0.0 and 1.0.
    pub fn jitter(mut self, jitter: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&jitter),
            "jitter must be between 0.0 and 1.0"
        );
        self.jitter = jitter;
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay");
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0");
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1");
        }
        Ok(())
    }

    /// Create an [`ExponentialBackoff`] iterator from this policy.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Exponential backoff iterator with jitter.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    /// Current delay without jitter, as f64 seconds to avoid rounding drift.
    current_delay_secs: f64,
    /// Number of attempts made (the initial attempt counts).
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let current_delay_secs = policy.base_delay.as_secs_f64();
        Self {
            policy,
            current_delay_secs,
            attempts: 1,
        }
    }

    /// Number of attempts made so far, including the initial one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the policy allows another attempt.
    pub fn can_attempt_again(&self) -> bool {
        self.attempts < self.policy.max_attempts
    }

    /// Get the delay before the next attempt, applying jitter, and advance
    /// the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay_secs;

        let jittered = if self.policy.jitter > 0.0 {
            let jitter_range = self.policy.jitter * 2.0;
            let random_factor = rand::random::<f64>() * jitter_range - self.policy.jitter;
            delay * (1.0 + random_factor)
        } else {
            delay
        };

        let clamped = jittered.min(self.policy.max_delay.as_secs_f64());

        self.current_delay_secs = (self.current_delay_secs * self.policy.multiplier)
            .min(self.policy.max_delay.as_secs_f64());
        self.attempts += 1;

        Duration::from_secs_f64(clamped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert!((policy.multiplier - 1.6).abs() < f64::EPSILON);
        assert!((policy.jitter - 0.2).abs() < f64::EPSILON);
        assert_eq!(policy.max_delay, Duration::from_secs(120));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_policy_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.backoff().can_attempt_again());
    }

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::new()
            .max_attempts(5)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10))
            .multiplier(2.0)
            .jitter(0.1);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((policy.jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_policy_validate() {
        assert!(RetryPolicy::default().validate().is_ok());

        let invalid = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    #[should_panic(expected = "multiplier must be >= 1.0")]
    fn test_policy_invalid_multiplier() {
        let _ = RetryPolicy::new().multiplier(0.5);
    }

    #[test]
    #[should_panic(expected = "jitter must be between 0.0 and 1.0")]
    fn test_policy_invalid_jitter() {
        let _ = RetryPolicy::new().jitter(1.5);
    }

    #[test]
    fn test_backoff_no_jitter() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(1))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(100))
            .jitter(0.0);

        let mut backoff = policy.backoff();

        assert_eq!(backoff.attempts(), 1);
        assert!(backoff.can_attempt_again());

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempts(), 2);

        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_max_delay_clamping() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(10))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(15))
            .jitter(0.0)
            .max_attempts(10);

        let mut backoff = policy.backoff();

        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        // 100s clamps to 15s, and stays clamped.
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
        assert_eq!(backoff.next_delay(), Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_with_jitter_stays_in_band() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(1))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(100))
            .jitter(0.2);

        let mut backoff = policy.backoff();

        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(800));
        assert!(delay <= Duration::from_millis(1200));
    }

    #[test]
    fn test_backoff_attempt_budget() {
        let policy = RetryPolicy::new().max_attempts(3).jitter(0.0);
        let mut backoff = policy.backoff();

        assert!(backoff.can_attempt_again()); // attempt 1 done, 2 allowed
        backoff.next_delay();
        assert!(backoff.can_attempt_again()); // attempt 2 done, 3 allowed
        backoff.next_delay();
        assert!(!backoff.can_attempt_again()); // attempt 3 done, budget spent
    }
}
