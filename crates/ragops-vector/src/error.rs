//! Vector backend error types.

use thiserror::Error;

/// Errors that can occur talking to a vector backend.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Request could not be sent or the response not read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with an unexpected status
    #[error("{operation} failed: {status} {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Collection (or alias) does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Serialization(err.to_string())
    }
}
