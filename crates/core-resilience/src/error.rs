//! Error types for resilience primitives

use thiserror::Error;

/// Errors raised when a resilience primitive is misconfigured
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    /// A retry policy that can never make a first attempt or computes nonsense delays
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}
