//! Throttle: "do at most once per interval"
//!
//! Unlike a ticker, a throttle never fires on its own. Callers poke it whenever
//! something interesting happens and it lets at most one of them through per
//! interval, so a burst of N completions in the same instant produces one log
//! line instead of N. The first poke always fires.
//!
//! Backed by a governor GCRA limiter with a burst of one; a zero interval
//! disables throttling entirely.
//!
//! # Example
//!
//! ```
//! use mirror_core_resilience::throttle::Throttle;
//! use std::time::Duration;
//!
//! let throttle = Throttle::new(Duration::from_secs(60));
//! let mut lines = 0;
//! for _ in 0..100 {
//!     throttle.run_if_due(|| lines += 1);
//! }
//! assert_eq!(lines, 1);
//! ```

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::time::Duration;

/// Time-gated guard allowing one caller through per interval
pub struct Throttle {
    limiter: Option<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Throttle {
    /// Create a throttle that fires at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(interval).map(GovernorRateLimiter::direct),
        }
    }

    /// Claim the current interval if nobody has yet
    pub fn try_fire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Run `f` if the interval is due, returning whether it ran
    pub fn run_if_due<F: FnOnce()>(&self, f: F) -> bool {
        if self.try_fire() {
            f();
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_call_fires() {
        let throttle = Throttle::new(Duration::from_secs(60));
        assert!(throttle.try_fire());
        assert!(!throttle.try_fire());
    }

    #[test]
    fn test_fires_again_after_interval() {
        let throttle = Throttle::new(Duration::from_millis(50));

        assert!(throttle.try_fire());
        assert!(!throttle.try_fire());
        thread::sleep(Duration::from_millis(120));
        assert!(throttle.try_fire());
        assert!(!throttle.try_fire());
    }

    #[test]
    fn test_zero_interval_always_fires() {
        let throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.try_fire());
        assert!(throttle.try_fire());
    }

    #[test]
    fn test_burst_from_many_threads_fires_once() {
        let throttle = Arc::new(Throttle::new(Duration::from_secs(3600)));
        let fired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let fired = Arc::clone(&fired);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        throttle.run_if_due(|| {
                            fired.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
