/*!
 * Error types for renterd-mirror
 */

use std::fmt;
use std::io;
use thiserror::Error;

use crate::destination::DestinationError;
use crate::pipeline::transfer::TransferError;
use crate::source::SourceError;

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CONFIG: i32 = 3;

/// Errors that end a mirror pass
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source listing failed; the producer cannot continue without a consistent view
    #[error("Failed to list objects in bucket {bucket}: {source}")]
    Listing {
        bucket: String,
        #[source]
        source: SourceError,
    },

    /// The destination could not say whether an object exists
    #[error("Failed to check object existence for {path}: {source}")]
    ExistenceIndeterminate {
        path: String,
        #[source]
        source: DestinationError,
    },

    /// An object exhausted its retries under the abort policy
    #[error("Upload of {key} failed after {attempts} attempts: {source}")]
    TransferFailed {
        key: String,
        attempts: u32,
        #[source]
        source: TransferError,
    },

    /// The pass completed but some objects were skipped after permanent failures
    #[error("{failed} objects failed to upload and were skipped")]
    PartialFailure { failed: u64 },

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    Logging(String),

    /// A pipeline task panicked or was aborted by the runtime
    #[error("Pipeline task failed: {0}")]
    Task(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MirrorError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MirrorError::Config(_) | MirrorError::Logging(_) => EXIT_CONFIG,
            MirrorError::PartialFailure { .. } => EXIT_PARTIAL,
            MirrorError::Listing { .. }
            | MirrorError::ExistenceIndeterminate { .. }
            | MirrorError::TransferFailed { .. }
            | MirrorError::Task(_)
            | MirrorError::Io(_) => EXIT_FATAL,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            MirrorError::Config(_) | MirrorError::Logging(_) => ErrorCategory::Configuration,
            MirrorError::Listing { .. } => ErrorCategory::Source,
            MirrorError::ExistenceIndeterminate { .. } => ErrorCategory::Destination,
            MirrorError::TransferFailed { .. } | MirrorError::PartialFailure { .. } => {
                ErrorCategory::Retry
            }
            MirrorError::Task(_) => ErrorCategory::Concurrency,
            MirrorError::Io(_) => ErrorCategory::IoError,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// Source bucket listing/read errors
    Source,
    /// Destination metadata errors
    Destination,
    /// Retry exhaustion
    Retry,
    /// Task scheduling errors
    Concurrency,
    /// I/O operation errors
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Source => write!(f, "source"),
            ErrorCategory::Destination => write!(f, "destination"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}

impl From<mirror_core_resilience::ResilienceError> for MirrorError {
    fn from(err: mirror_core_resilience::ResilienceError) -> Self {
        MirrorError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MirrorError {
    fn from(err: tokio::task::JoinError) -> Self {
        MirrorError::Task(err.to_string())
    }
}
