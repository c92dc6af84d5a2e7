//! Error types for destination operations
//!
//! The destination reports a small closed set of error kinds so callers never
//! have to inspect message text to decide what happened.

use thiserror::Error;

/// Result type alias for destination operations
pub type DestinationResult<T> = Result<T, DestinationError>;

/// Errors reported by the destination storage network
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DestinationError {
    /// No object record exists at this path
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// An object record exists but has no data attached (empty or corrupt upload)
    #[error("No data found for object: {path}")]
    NoData { path: String },

    /// Anything else: network failure, HTTP error status, timeout, bad response
    #[error("{operation} failed: {message}")]
    Other { operation: String, message: String },
}

impl DestinationError {
    pub fn other(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DestinationError::Other {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, DestinationError::NotFound { .. })
    }

    /// Check if this error indicates an object record without data
    pub fn is_no_data(&self) -> bool {
        matches!(self, DestinationError::NoData { .. })
    }
}
