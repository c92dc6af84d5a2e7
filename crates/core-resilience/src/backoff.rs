//! Backoff: Retry scheduling for transient failures
//!
//! A [`RetryPolicy`] answers two questions for a worker that just watched an
//! attempt fail: "may I try again?" and "how long do I wait first?". It holds
//! no per-item state; the caller tracks the attempt number.
//!
//! # Strategies
//!
//! - **Fixed**: the same delay after every failure, normally paired with a bounded
//!   attempt count (e.g. 10 attempts, 30 seconds apart)
//! - **Exponential with jitter**: `min(max_delay, base^attempt * jitter)` where
//!   `jitter` is drawn uniformly from `[jitter_min, jitter_max)` on every call, so
//!   workers that failed together do not retry together
//!
//! # Example
//!
//! ```
//! use mirror_core_resilience::backoff::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     max_attempts: None,
//!     backoff: BackoffStrategy::ExponentialWithJitter {
//!         base: 2.0,
//!         max_delay: Duration::from_secs(60),
//!         jitter_min: 0.5,
//!         jitter_max: 1.5,
//!     },
//! };
//!
//! // Unbounded: always allowed to retry
//! assert!(policy.should_retry(1_000));
//!
//! // Never exceeds the cap
//! assert!(policy.delay_for(30) <= Duration::from_secs(60));
//! ```

use crate::error::ResilienceError;
use rand::Rng;
use std::time::Duration;

/// How the delay between attempts grows
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay after every failed attempt
    Fixed {
        /// Sleep between attempts
        delay: Duration,
    },

    /// `min(max_delay, base^attempt * jitter)` seconds, jitter drawn per attempt
    ExponentialWithJitter {
        /// Growth base in seconds (2.0 doubles the delay every attempt)
        base: f64,

        /// Ceiling applied after jitter
        max_delay: Duration,

        /// Lower bound of the jitter factor (inclusive)
        jitter_min: f64,

        /// Upper bound of the jitter factor (exclusive)
        jitter_max: f64,
    },
}

/// Retry policy for one item
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one (`None` = unbounded)
    pub max_attempts: Option<u32>,

    /// Delay schedule between attempts
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Bounded attempts with a fixed sleep between them
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: BackoffStrategy::Fixed { delay },
        }
    }

    /// Unbounded attempts with capped exponential backoff and jitter
    pub fn exponential(base: f64, max_delay: Duration, jitter_min: f64, jitter_max: f64) -> Self {
        Self {
            max_attempts: None,
            backoff: BackoffStrategy::ExponentialWithJitter {
                base,
                max_delay,
                jitter_min,
                jitter_max,
            },
        }
    }

    /// Bound the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Reject policies that can never attempt anything or produce invalid delays
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == Some(0) {
            return Err(ResilienceError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if let BackoffStrategy::ExponentialWithJitter {
            base,
            jitter_min,
            jitter_max,
            ..
        } = self.backoff
        {
            if !base.is_finite() || base < 1.0 {
                return Err(ResilienceError::InvalidPolicy(format!(
                    "exponential base must be >= 1.0, got {}",
                    base
                )));
            }
            if !jitter_min.is_finite() || !jitter_max.is_finite() || jitter_min < 0.0 {
                return Err(ResilienceError::InvalidPolicy(
                    "jitter bounds must be finite and non-negative".to_string(),
                ));
            }
            if jitter_min >= jitter_max {
                return Err(ResilienceError::InvalidPolicy(format!(
                    "jitter range is empty: [{}, {})",
                    jitter_min, jitter_max
                )));
            }
        }

        Ok(())
    }

    /// Whether another attempt is allowed after `attempts_made` attempts have failed
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed { delay } => delay,
            BackoffStrategy::ExponentialWithJitter {
                jitter_min,
                jitter_max,
                ..
            } => {
                let jitter = if jitter_min < jitter_max {
                    rand::rng().random_range(jitter_min..jitter_max)
                } else {
                    jitter_min
                };
                self.delay_with_jitter(attempt, jitter)
            }
        }
    }

    /// Delay for `attempt` using an explicit jitter factor
    ///
    /// Deterministic counterpart of [`delay_for`](Self::delay_for).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed { delay } => delay,
            BackoffStrategy::ExponentialWithJitter {
                base, max_delay, ..
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = base.powi(exponent) * jitter;
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    max_delay
                } else if secs <= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    /// Upper bound on the total time spent sleeping before giving up
    ///
    /// `None` when attempts are unbounded. No sleep follows the final attempt.
    pub fn max_total_delay(&self) -> Option<Duration> {
        let max = self.max_attempts?;
        let sleeps = max.saturating_sub(1);
        let per_sleep = match self.backoff {
            BackoffStrategy::Fixed { delay } => delay,
            BackoffStrategy::ExponentialWithJitter { max_delay, .. } => max_delay,
        };
        Some(per_sleep.saturating_mul(sleeps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential() -> RetryPolicy {
        RetryPolicy::exponential(2.0, Duration::from_secs(60), 0.5, 1.5)
    }

    #[test]
    fn test_default_matches_fixed_ten_by_thirty() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(
            policy.backoff,
            BackoffStrategy::Fixed {
                delay: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_fixed_retry_budget() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.max_total_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = exponential();
        assert_eq!(policy.delay_with_jitter(1, 1.0), Duration::from_secs(2));
        assert_eq!(policy.delay_with_jitter(3, 1.0), Duration::from_secs(8));
        assert_eq!(policy.delay_with_jitter(3, 0.5), Duration::from_secs(4));
        assert_eq!(policy.delay_with_jitter(10, 1.0), Duration::from_secs(60));
        assert_eq!(policy.delay_with_jitter(u32::MAX, 1.0), Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_jitter_stays_in_range() {
        let policy = exponential();
        for _ in 0..200 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_secs(2), "{:?}", delay);
            assert!(delay < Duration::from_secs(6), "{:?}", delay);
        }
    }

    #[test]
    fn test_exponential_is_unbounded_unless_capped() {
        let policy = exponential();
        assert!(policy.should_retry(u32::MAX - 1));
        assert_eq!(policy.max_total_delay(), None);

        let bounded = exponential().with_max_attempts(4);
        assert!(!bounded.should_retry(4));
        assert_eq!(bounded.max_total_delay(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(exponential().validate().is_ok());
        assert!(RetryPolicy::fixed(0, Duration::from_secs(1)).validate().is_err());
        assert!(RetryPolicy::exponential(0.5, Duration::from_secs(60), 0.5, 1.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::exponential(2.0, Duration::from_secs(60), 1.5, 0.5)
            .validate()
            .is_err());
        assert!(RetryPolicy::exponential(2.0, Duration::from_secs(60), -1.0, 0.5)
            .validate()
            .is_err());
    }
}
