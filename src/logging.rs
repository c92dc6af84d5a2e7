/*!
 * Logging and tracing initialization
 *
 * Every event goes to two places: a compact human-readable stream on stdout and
 * a JSON log file that is appended to across runs.
 */

use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::{MirrorError, Result};

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(config)?;
    let file = open_log_file(&config.log_path)?;

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false) // No ANSI colors in file
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MirrorError::Logging(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let level = config.log_level.to_tracing_level();
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "warn,renterd_mirror={level},mirror_core_resilience={level}"
            ))
        })
        .map_err(|e| MirrorError::Logging(format!("Failed to create log filter: {}", e)))
}

/// Open the log file for appending, creating it if needed
fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            MirrorError::Logging(format!("Failed to open log file {}: {}", path.display(), e))
        })
}
