/*!
 * Configuration types for renterd-mirror
 *
 * A `MirrorConfig` is built once at startup (TOML file, then CLI flags on top),
 * validated, and then shared read-only by every task.
 */

use crate::destination::UploadOptions;
use crate::error::MirrorError;
use mirror_core_resilience::RetryPolicy;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for MirrorError {
    fn from(err: ConfigError) -> Self {
        MirrorError::Config(err.to_string())
    }
}

/// Complete configuration for one mirror process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub destination: DestinationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Allow-list reconciliation (disabled when absent)
    #[serde(default)]
    pub allowlist: Option<AllowlistConfig>,
}

/// Source bucket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Bucket to mirror
    #[serde(default)]
    pub bucket: String,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Read without credentials (public buckets)
    #[serde(default = "default_true")]
    pub anonymous: bool,

    /// Use path-style addressing (required by most S3-compatible services)
    #[serde(default)]
    pub force_path_style: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            anonymous: true,
            force_path_style: false,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// renterd node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Bus API base URL
    #[serde(default = "default_bus_address")]
    pub bus_address: String,

    /// Bus API password
    #[serde(
        default = "empty_secret",
        deserialize_with = "deserialize_secret",
        skip_serializing
    )]
    pub bus_password: SecretString,

    /// Worker API base URL
    #[serde(default = "default_worker_address")]
    pub worker_address: String,

    /// Worker API password
    #[serde(
        default = "empty_secret",
        deserialize_with = "deserialize_secret",
        skip_serializing
    )]
    pub worker_password: SecretString,

    /// Contract set uploads are restricted to
    #[serde(default = "default_contract_set")]
    pub contract_set: String,

    /// Shards needed to reconstruct an object
    #[serde(default = "default_min_shards")]
    pub min_shards: u32,

    /// Shards stored per object
    #[serde(default = "default_total_shards")]
    pub total_shards: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            bus_address: default_bus_address(),
            bus_password: empty_secret(),
            worker_address: default_worker_address(),
            worker_password: empty_secret(),
            contract_set: default_contract_set(),
            min_shards: default_min_shards(),
            total_shards: default_total_shards(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DestinationConfig {
    /// Ingest options passed through to every upload
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            contract_set: self.contract_set.clone(),
            min_shards: self.min_shards,
            total_shards: self.total_shards,
        }
    }
}

/// What to do with an object that exhausted its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the pass and exit non-zero
    #[default]
    Abort,

    /// Log the failure, count it, and keep going
    Skip,
}

/// Backoff between failed upload attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BackoffConfig {
    /// Bounded attempts with a constant sleep
    Fixed {
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,

        #[serde(default = "default_retry_delay")]
        delay_secs: u64,
    },

    /// `min(max_delay, base^attempt * jitter)`, unbounded unless `max_attempts` is set
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,

        #[serde(default = "default_max_delay")]
        max_delay_secs: u64,

        #[serde(default = "default_jitter_min")]
        jitter_min: f64,

        #[serde(default = "default_jitter_max")]
        jitter_max: f64,

        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::fixed()
    }
}

impl BackoffConfig {
    /// Ten attempts, thirty seconds apart
    pub fn fixed() -> Self {
        BackoffConfig::Fixed {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay(),
        }
    }

    /// Base 2, capped at 60s, jitter 0.5..1.5, unbounded attempts
    pub fn exponential() -> Self {
        BackoffConfig::Exponential {
            base: default_exponential_base(),
            max_delay_secs: default_max_delay(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            max_attempts: None,
        }
    }

    /// Build the retry policy this configuration describes
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackoffConfig::Fixed {
                max_attempts,
                delay_secs,
            } => RetryPolicy::fixed(*max_attempts, Duration::from_secs(*delay_secs)),
            BackoffConfig::Exponential {
                base,
                max_delay_secs,
                jitter_min,
                jitter_max,
                max_attempts,
            } => {
                let policy = RetryPolicy::exponential(
                    *base,
                    Duration::from_secs(*max_delay_secs),
                    *jitter_min,
                    *jitter_max,
                );
                match max_attempts {
                    Some(max) => policy.with_max_attempts(*max),
                    None => policy,
                }
            }
        }
    }
}

/// Transfer pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of upload workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Work queue capacity (defaults to the worker count)
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Upper bound on one existence lookup, in seconds
    #[serde(default = "default_existence_timeout")]
    pub existence_timeout_secs: u64,

    /// Handling of objects that exhaust their retries
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Objects at or below this health percentage are uploaded again.
    /// `"off"` disables the check; a negative value never matches.
    #[serde(
        default = "default_health_threshold",
        serialize_with = "serialize_health_threshold",
        deserialize_with = "deserialize_health_threshold"
    )]
    pub degraded_health_threshold: Option<f64>,

    /// Read each object back after upload and compare checksums
    #[serde(default)]
    pub verify_uploads: bool,

    /// Minimum seconds between progress log lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Read-ahead buffer between source and destination, in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: None,
            existence_timeout_secs: default_existence_timeout(),
            failure_policy: FailurePolicy::default(),
            backoff: BackoffConfig::default(),
            degraded_health_threshold: default_health_threshold(),
            verify_uploads: false,
            progress_interval_secs: default_progress_interval(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl PipelineConfig {
    /// Effective queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers)
    }

    pub fn existence_timeout(&self) -> Duration {
        Duration::from_secs(self.existence_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.backoff.retry_policy()
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// JSON log file, appended to
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            log_level: LogLevel::default(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Host allow-list reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowlistConfig {
    /// Host directory URL returning the candidate hosts as JSON
    pub directory_url: String,

    /// Seconds between reconcile passes
    #[serde(default = "default_allowlist_interval")]
    pub interval_secs: u64,

    /// Hosts scoring below this are left out
    #[serde(default)]
    pub min_score: f64,

    /// Only keep hosts currently accepting contracts
    #[serde(default = "default_true")]
    pub accepting_contracts_only: bool,
}

impl AllowlistConfig {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            interval_secs: default_allowlist_interval(),
            min_score: 0.0,
            accepting_contracts_only: true,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_bus_address() -> String {
    "http://localhost:9980/api/bus".to_string()
}

fn default_worker_address() -> String {
    "http://localhost:9980/api/worker".to_string()
}

fn default_contract_set() -> String {
    "autopilot".to_string()
}

fn default_min_shards() -> u32 {
    10
}

fn default_total_shards() -> u32 {
    30
}

fn default_workers() -> usize {
    2
}

fn default_existence_timeout() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    30
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    60
}

fn default_jitter_min() -> f64 {
    0.5
}

fn default_jitter_max() -> f64 {
    1.5
}

fn default_health_threshold() -> Option<f64> {
    Some(25.0)
}

fn default_progress_interval() -> u64 {
    60
}

fn default_read_buffer_size() -> usize {
    32 * 1024 * 1024 // 32 MiB
}

fn default_log_path() -> PathBuf {
    PathBuf::from("mirror.log")
}

fn default_allowlist_interval() -> u64 {
    3600
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new().into_boxed_str())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(SecretString::new(value.into_boxed_str()))
}

/// Parse a health threshold: a percentage, or `off` to disable the check
pub fn parse_health_threshold(value: &str) -> Result<Option<f64>, String> {
    let value = value.trim();
    if ["off", "none", "disabled"]
        .iter()
        .any(|keyword| value.eq_ignore_ascii_case(keyword))
    {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("invalid health threshold '{}': expected a percentage or 'off'", value))
}

fn serialize_health_threshold<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(threshold) => serializer.serialize_f64(*threshold),
        None => serializer.serialize_str("off"),
    }
}

fn deserialize_health_threshold<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Threshold {
        Percent(f64),
        Keyword(String),
    }

    match Threshold::deserialize(deserializer)? {
        Threshold::Percent(threshold) => Ok(Some(threshold)),
        Threshold::Keyword(keyword) => {
            parse_health_threshold(&keyword).map_err(<D::Error as serde::de::Error>::custom)
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Render as TOML (passwords are never written out)
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check invariants that would otherwise surface mid-pass
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("source bucket is required".to_string()));
        }

        let dest = &self.destination;
        if dest.min_shards < 1 {
            return Err(ConfigError::Invalid("min_shards must be at least 1".to_string()));
        }
        if dest.total_shards < dest.min_shards {
            return Err(ConfigError::Invalid(format!(
                "total_shards ({}) must be at least min_shards ({})",
                dest.total_shards, dest.min_shards
            )));
        }

        let pipeline = &self.pipeline;
        if pipeline.workers < 1 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if pipeline.queue_capacity() < 1 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if pipeline.existence_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "existence_timeout_secs must be positive".to_string(),
            ));
        }
        if pipeline.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "read_buffer_size must be positive".to_string(),
            ));
        }
        pipeline
            .retry_policy()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Some(allowlist) = &self.allowlist {
            if allowlist.directory_url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "allowlist directory_url is required".to_string(),
                ));
            }
            if allowlist.interval_secs == 0 {
                return Err(ConfigError::Invalid(
                    "allowlist interval_secs must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
