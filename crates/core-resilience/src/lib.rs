//! Mirror Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! Building blocks the mirror pipeline uses to survive transient failures of
//! either endpoint without knowing anything about S3, renterd or HTTP:
//!
//! - **Backoff**: Retry policies for a single object, either a bounded number of
//!   fixed-interval attempts or unbounded exponential backoff with jitter
//! - **Throttle**: A time-gated "do at most once per interval" guard, used to keep
//!   bursts of completions from flooding the progress log
//!
//! # Architecture
//!
//! ```text
//!   worker ──► transfer attempt ──► failed? ──► RetryPolicy::delay_for(attempt)
//!                    │                               │
//!                    │ ok                            └─► sleep, try again
//!                    ▼
//!          ProgressTracker ──► Throttle::run_if_due(log snapshot)
//! ```
//!
//! # Usage Example
//!
//! ```
//! use mirror_core_resilience::{RetryPolicy, Throttle};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::fixed(10, Duration::from_secs(30));
//! assert!(policy.should_retry(9));
//! assert!(!policy.should_retry(10));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(30));
//!
//! let throttle = Throttle::new(Duration::from_secs(60));
//! assert!(throttle.try_fire());
//! assert!(!throttle.try_fire());
//! ```

pub mod backoff;
pub mod error;
pub mod throttle;

// Re-export main types for convenience
pub use backoff::{BackoffStrategy, RetryPolicy};
pub use error::ResilienceError;
pub use throttle::Throttle;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use mirror_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::{BackoffStrategy, RetryPolicy};
    pub use super::error::ResilienceError;
    pub use super::throttle::Throttle;
}
