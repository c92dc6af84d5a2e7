//! Decides whether an object still needs to be uploaded
//!
//! Lookups are classified into three outcomes. Only `Present` objects are
//! skipped; anything the destination cannot vouch for is either re-uploaded
//! (`Absent`) or stops the pass (`Indeterminate`), since guessing wrong would
//! either duplicate work forever or silently lose data.

use crate::destination::{Destination, DestinationError, ObjectInfo};
use std::sync::Arc;
use std::time::Duration;

/// Why an object counts as missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentReason {
    /// No record at the path
    NotFound,

    /// A record exists without data (empty or corrupt earlier upload)
    NoData,

    /// The stored copy has lost too much redundancy
    Degraded,
}

/// Result of one existence lookup
#[derive(Debug)]
pub enum Existence {
    /// Stored and healthy enough to keep
    Present(ObjectInfo),

    /// Needs to be uploaded
    Absent(AbsentReason),

    /// The destination could not answer
    Indeterminate(DestinationError),
}

/// Classifies destination lookups
pub struct ExistenceChecker {
    destination: Arc<dyn Destination>,
    timeout: Duration,
    degraded_health_threshold: Option<f64>,
}

impl ExistenceChecker {
    pub fn new(
        destination: Arc<dyn Destination>,
        timeout: Duration,
        degraded_health_threshold: Option<f64>,
    ) -> Self {
        Self {
            destination,
            timeout,
            degraded_health_threshold,
        }
    }

    /// Look up `path` and classify the answer
    pub async fn check(&self, path: &str) -> Existence {
        let lookup = tokio::time::timeout(self.timeout, self.destination.object(path)).await;
        match lookup {
            Ok(Ok(info)) => match self.degraded_health_threshold {
                Some(threshold) if info.health <= threshold => {
                    Existence::Absent(AbsentReason::Degraded)
                }
                _ => Existence::Present(info),
            },
            Ok(Err(DestinationError::NotFound { .. })) => {
                Existence::Absent(AbsentReason::NotFound)
            }
            Ok(Err(DestinationError::NoData { .. })) => Existence::Absent(AbsentReason::NoData),
            Ok(Err(err)) => Existence::Indeterminate(err),
            Err(_) => Existence::Indeterminate(DestinationError::other(
                "object",
                format!("lookup of {} timed out after {:?}", path, self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDestination;

    fn checker(destination: &MemoryDestination, threshold: Option<f64>) -> ExistenceChecker {
        ExistenceChecker::new(
            Arc::new(destination.clone()),
            Duration::from_secs(15),
            threshold,
        )
    }

    #[tokio::test]
    async fn test_present() {
        let destination = MemoryDestination::new();
        destination.insert("bucket/a", vec![1, 2, 3]);

        match checker(&destination, Some(25.0)).check("bucket/a").await {
            Existence::Present(info) => {
                assert_eq!(info.size, 3);
                assert_eq!(info.health, 100.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_and_no_data() {
        let destination = MemoryDestination::new();
        destination.insert_without_data("bucket/broken", 1024);
        let checker = checker(&destination, Some(25.0));

        assert!(matches!(
            checker.check("bucket/missing").await,
            Existence::Absent(AbsentReason::NotFound)
        ));
        assert!(matches!(
            checker.check("bucket/broken").await,
            Existence::Absent(AbsentReason::NoData)
        ));
    }

    #[tokio::test]
    async fn test_health_threshold() {
        let destination = MemoryDestination::new();
        destination.insert("bucket/at", vec![0; 4]);
        destination.set_health("bucket/at", 25.0);
        destination.insert("bucket/above", vec![0; 4]);
        destination.set_health("bucket/above", 25.5);

        let enabled = checker(&destination, Some(25.0));
        assert!(matches!(
            enabled.check("bucket/at").await,
            Existence::Absent(AbsentReason::Degraded)
        ));
        assert!(matches!(
            enabled.check("bucket/above").await,
            Existence::Present(_)
        ));

        let disabled = checker(&destination, None);
        assert!(matches!(
            disabled.check("bucket/at").await,
            Existence::Present(_)
        ));
    }

    #[tokio::test]
    async fn test_other_error_is_indeterminate() {
        let destination = MemoryDestination::new();
        destination.fail_lookups("bucket/a", DestinationError::other("object", "500"));

        assert!(matches!(
            checker(&destination, Some(25.0)).check("bucket/a").await,
            Existence::Indeterminate(DestinationError::Other { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_indeterminate() {
        let destination = MemoryDestination::new();
        destination.stall_lookups();

        let result = checker(&destination, Some(25.0)).check("bucket/a").await;
        match result {
            Existence::Indeterminate(err) => assert!(err.to_string().contains("timed out")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
