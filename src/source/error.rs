//! Error types for source bucket operations

use thiserror::Error;

/// Result type alias for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors reported by the source bucket
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Any other failure (network, access, throttling)
    #[error("{operation} failed: {message}")]
    Other { operation: String, message: String },
}

impl SourceError {
    pub fn other(operation: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Other {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates the object was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}
