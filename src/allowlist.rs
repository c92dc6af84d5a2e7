//! Host allow-list reconciliation
//!
//! Keeps the destination's host allow-list in step with the hosts a directory
//! service currently considers good. Each pass computes a set difference and
//! pushes only the changes; nothing is pushed when the lists already agree.
//!
//! This runs beside the mirror pipeline and shares nothing with it except the
//! destination client.

use crate::config::AllowlistConfig;
use crate::destination::{DestinationError, DestinationResult, HostAllowlist};
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One host as reported by the directory
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostInfo {
    pub public_key: String,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub accepting_contracts: bool,
}

impl HostInfo {
    pub fn new(public_key: impl Into<String>, score: f64, accepting_contracts: bool) -> Self {
        Self {
            public_key: public_key.into(),
            score,
            accepting_contracts,
        }
    }
}

/// Criteria a host must meet to be allowed
#[derive(Debug, Clone, PartialEq)]
pub struct HostFilter {
    pub min_score: f64,
    pub accepting_contracts_only: bool,
}

impl HostFilter {
    pub fn matches(&self, host: &HostInfo) -> bool {
        host.score >= self.min_score && (host.accepting_contracts || !self.accepting_contracts_only)
    }

    /// Public keys of the hosts that pass, in input order
    pub fn apply<'a>(&self, hosts: impl IntoIterator<Item = &'a HostInfo>) -> Vec<String> {
        hosts
            .into_iter()
            .filter(|host| self.matches(host))
            .map(|host| host.public_key.clone())
            .collect()
    }
}

impl From<&AllowlistConfig> for HostFilter {
    fn from(config: &AllowlistConfig) -> Self {
        Self {
            min_score: config.min_score,
            accepting_contracts_only: config.accepting_contracts_only,
        }
    }
}

/// Source of candidate hosts
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Public keys of every host passing `filter`
    async fn qualifying_hosts(&self, filter: &HostFilter) -> DestinationResult<Vec<String>>;
}

/// Host directory served over HTTP as a JSON array of [`HostInfo`]
pub struct HttpHostDirectory {
    http: reqwest::Client,
    url: url::Url,
}

impl HttpHostDirectory {
    pub fn new(url: &str) -> Result<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| MirrorError::Config(format!("invalid host directory URL: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl HostDirectory for HttpHostDirectory {
    async fn qualifying_hosts(&self, filter: &HostFilter) -> DestinationResult<Vec<String>> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| DestinationError::other("list hosts", e.to_string()))?;

        let hosts: Vec<HostInfo> = response
            .json()
            .await
            .map_err(|e| DestinationError::other("list hosts", e.to_string()))?;
        Ok(filter.apply(&hosts))
    }
}

/// Changes made (or needed) by one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowlistDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl AllowlistDiff {
    /// `add = qualifying - current`, `remove = current - qualifying`, both sorted
    pub fn between(current: &[String], qualifying: &[String]) -> Self {
        let current: BTreeSet<&String> = current.iter().collect();
        let qualifying: BTreeSet<&String> = qualifying.iter().collect();
        Self {
            add: qualifying.difference(&current).map(|s| s.to_string()).collect(),
            remove: current.difference(&qualifying).map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Periodically aligns the destination allow-list with a host directory
pub struct AllowlistReconciler {
    destination: Arc<dyn HostAllowlist>,
    directory: Arc<dyn HostDirectory>,
    filter: HostFilter,
}

impl AllowlistReconciler {
    pub fn new(
        destination: Arc<dyn HostAllowlist>,
        directory: Arc<dyn HostDirectory>,
        filter: HostFilter,
    ) -> Self {
        Self {
            destination,
            directory,
            filter,
        }
    }

    /// Fetch both lists, push the difference, return what changed
    pub async fn reconcile_once(&self) -> DestinationResult<AllowlistDiff> {
        let current = self.destination.allowlist().await?;
        let qualifying = self.directory.qualifying_hosts(&self.filter).await?;

        let diff = AllowlistDiff::between(&current, &qualifying);
        if diff.is_empty() {
            debug!(hosts = current.len(), "allowlist already in sync");
            return Ok(diff);
        }

        self.destination
            .update_allowlist(&diff.add, &diff.remove)
            .await?;
        info!(
            added = diff.add.len(),
            removed = diff.remove.len(),
            "allowlist updated"
        );
        Ok(diff)
    }

    /// Reconcile every `interval` until `cancel` fires
    ///
    /// The first pass runs immediately. Failures are logged and retried on the
    /// next tick.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile_once().await {
                        warn!(error = %err, "allowlist reconcile failed");
                    }
                }
            }
        }
        debug!("allowlist reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDestination, MemoryHostDirectory};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn reconciler(
        destination: &MemoryDestination,
        directory: &MemoryHostDirectory,
    ) -> AllowlistReconciler {
        AllowlistReconciler::new(
            Arc::new(destination.clone()),
            Arc::new(directory.clone()),
            HostFilter {
                min_score: 0.5,
                accepting_contracts_only: true,
            },
        )
    }

    #[test]
    fn test_diff_is_set_difference() {
        let diff = AllowlistDiff::between(&strings(&["a", "b", "c"]), &strings(&["b", "d", "c", "e"]));
        assert_eq!(diff.add, strings(&["d", "e"]));
        assert_eq!(diff.remove, strings(&["a"]));

        let same = AllowlistDiff::between(&strings(&["x", "y"]), &strings(&["y", "x"]));
        assert!(same.is_empty());
    }

    #[test]
    fn test_filter() {
        let filter = HostFilter {
            min_score: 0.5,
            accepting_contracts_only: true,
        };
        assert!(filter.matches(&HostInfo::new("a", 0.5, true)));
        assert!(!filter.matches(&HostInfo::new("b", 0.4, true)));
        assert!(!filter.matches(&HostInfo::new("c", 0.9, false)));

        let lenient = HostFilter {
            min_score: 0.0,
            accepting_contracts_only: false,
        };
        assert!(lenient.matches(&HostInfo::new("c", 0.9, false)));
    }

    #[test]
    fn test_host_info_json() {
        let hosts: Vec<HostInfo> = serde_json::from_str(
            r#"[{"public_key": "ed25519:aa", "score": 0.8, "accepting_contracts": true},
                {"public_key": "ed25519:bb"}]"#,
        )
        .unwrap();
        assert_eq!(hosts[0], HostInfo::new("ed25519:aa", 0.8, true));
        assert_eq!(hosts[1], HostInfo::new("ed25519:bb", 0.0, false));
    }

    #[tokio::test]
    async fn test_reconcile_pushes_changes() {
        let destination = MemoryDestination::new();
        destination.set_allowlist(strings(&["old", "keep"]));
        let directory = MemoryHostDirectory::new(vec![
            HostInfo::new("keep", 0.9, true),
            HostInfo::new("new", 0.7, true),
            HostInfo::new("low", 0.1, true),
            HostInfo::new("full", 0.9, false),
        ]);

        let diff = reconciler(&destination, &directory)
            .reconcile_once()
            .await
            .unwrap();

        assert_eq!(diff.add, strings(&["new"]));
        assert_eq!(diff.remove, strings(&["old"]));
        assert_eq!(
            destination.allowlist_updates(),
            vec![(strings(&["new"]), strings(&["old"]))]
        );
    }

    #[tokio::test]
    async fn test_reconcile_in_sync_pushes_nothing() {
        let destination = MemoryDestination::new();
        destination.set_allowlist(strings(&["a"]));
        let directory = MemoryHostDirectory::new(vec![HostInfo::new("a", 1.0, true)]);

        let diff = reconciler(&destination, &directory)
            .reconcile_once()
            .await
            .unwrap();

        assert!(diff.is_empty());
        assert!(destination.allowlist_updates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_cancelled() {
        let destination = MemoryDestination::new();
        let directory = MemoryHostDirectory::new(vec![HostInfo::new("a", 1.0, true)]);
        let reconciler = reconciler(&destination, &directory);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let changer = directory.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            changer.set_hosts(vec![HostInfo::new("b", 1.0, true)]);
            tokio::time::sleep(Duration::from_secs(60)).await;
            trigger.cancel();
        });

        reconciler.run(Duration::from_secs(60), cancel).await;

        // t=0 adds a, t=60 in sync, t=120 swaps a for b
        assert_eq!(
            destination.allowlist_updates(),
            vec![
                (strings(&["a"]), vec![]),
                (strings(&["b"]), strings(&["a"])),
            ]
        );
    }
}
