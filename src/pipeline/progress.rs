//! Live progress accounting shared by the producer and every worker
//!
//! Four monotonically increasing counters, updated with atomic adds only. A
//! snapshot reads each counter independently, so under concurrent updates the
//! four values may come from slightly different instants; each one on its own
//! is exact.

use crate::size::{format_bps, format_byte_string};
use mirror_core_resilience::Throttle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Point-in-time copy of the progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    /// Objects transferred or skipped as already present
    pub objects_completed: u64,

    /// Logical bytes transferred during this pass
    pub logical_bytes_completed: u64,

    /// Network bytes consumed by transfers made during this pass
    pub redundant_bytes_completed: u64,

    /// Network bytes of every completed object, including skipped ones
    pub redundant_bytes_total: u64,
}

/// Thread-safe progress counters with a throttled snapshot logger
#[derive(Debug)]
pub struct ProgressTracker {
    objects_completed: AtomicU64,
    logical_bytes_completed: AtomicU64,
    redundant_bytes_completed: AtomicU64,
    redundant_bytes_total: AtomicU64,
    started: Instant,
    throttle: Throttle,
}

impl ProgressTracker {
    /// Create a tracker that logs at most once per `log_interval`
    pub fn new(log_interval: Duration) -> Self {
        Self {
            objects_completed: AtomicU64::new(0),
            logical_bytes_completed: AtomicU64::new(0),
            redundant_bytes_completed: AtomicU64::new(0),
            redundant_bytes_total: AtomicU64::new(0),
            started: Instant::now(),
            throttle: Throttle::new(log_interval),
        }
    }

    /// Record one object uploaded during this pass
    pub fn record_transferred(&self, logical: u64, redundant: u64) {
        self.logical_bytes_completed
            .fetch_add(logical, Ordering::Relaxed);
        self.redundant_bytes_completed
            .fetch_add(redundant, Ordering::Relaxed);
        self.redundant_bytes_total
            .fetch_add(redundant, Ordering::Relaxed);
        self.objects_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one object found already present at the destination
    ///
    /// Returns the counters as they stand right after this update.
    pub fn record_skipped_existing(&self, redundant: u64) -> ProgressCounters {
        let total = self
            .redundant_bytes_total
            .fetch_add(redundant, Ordering::Relaxed)
            .saturating_add(redundant);
        let objects = self.objects_completed.fetch_add(1, Ordering::Relaxed) + 1;

        ProgressCounters {
            objects_completed: objects,
            redundant_bytes_total: total,
            ..self.snapshot()
        }
    }

    /// Read all four counters
    pub fn snapshot(&self) -> ProgressCounters {
        ProgressCounters {
            objects_completed: self.objects_completed.load(Ordering::Relaxed),
            logical_bytes_completed: self.logical_bytes_completed.load(Ordering::Relaxed),
            redundant_bytes_completed: self.redundant_bytes_completed.load(Ordering::Relaxed),
            redundant_bytes_total: self.redundant_bytes_total.load(Ordering::Relaxed),
        }
    }

    /// Time since the tracker was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log a progress line if the interval has passed since the last one
    ///
    /// Returns whether a line was emitted.
    pub fn maybe_log(&self) -> bool {
        self.throttle.run_if_due(|| self.log_snapshot())
    }

    fn log_snapshot(&self) {
        let counters = self.snapshot();
        let elapsed = self.elapsed();
        info!(
            bytes = counters.logical_bytes_completed,
            size = %format_byte_string(counters.logical_bytes_completed),
            speed = %format_bps(counters.redundant_bytes_completed, elapsed),
            redundant_bytes = counters.redundant_bytes_completed,
            objects = counters.objects_completed,
            total_bytes = counters.redundant_bytes_total,
            total = %format_byte_string(counters.redundant_bytes_total),
            elapsed = ?elapsed,
            "upload progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_transferred() {
        let tracker = ProgressTracker::new(Duration::from_secs(60));
        tracker.record_transferred(100, 4000);
        tracker.record_transferred(0, 0);

        assert_eq!(
            tracker.snapshot(),
            ProgressCounters {
                objects_completed: 2,
                logical_bytes_completed: 100,
                redundant_bytes_completed: 4000,
                redundant_bytes_total: 4000,
            }
        );
    }

    #[test]
    fn test_record_skipped_existing() {
        let tracker = ProgressTracker::new(Duration::from_secs(60));
        tracker.record_transferred(10, 300);

        let after = tracker.record_skipped_existing(500);
        assert_eq!(after.objects_completed, 2);
        assert_eq!(after.redundant_bytes_total, 800);
        assert_eq!(after.logical_bytes_completed, 10);
        assert_eq!(after.redundant_bytes_completed, 300);
    }

    #[test]
    fn test_maybe_log_is_throttled() {
        let tracker = ProgressTracker::new(Duration::from_secs(3600));
        assert!(tracker.maybe_log());
        for _ in 0..50 {
            assert!(!tracker.maybe_log());
        }
    }

    #[test]
    fn test_concurrent_updates() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 1000;

        let tracker = Arc::new(ProgressTracker::new(Duration::from_secs(3600)));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        if i % 2 == 0 {
                            tracker.record_transferred(3, 7);
                        } else {
                            tracker.record_skipped_existing(5);
                        }
                        tracker.maybe_log();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counters = tracker.snapshot();
        let half = THREADS / 2 * PER_THREAD;
        assert_eq!(counters.objects_completed, THREADS * PER_THREAD);
        assert_eq!(counters.logical_bytes_completed, half * 3);
        assert_eq!(counters.redundant_bytes_completed, half * 7);
        assert_eq!(counters.redundant_bytes_total, half * 7 + half * 5);
    }
}
