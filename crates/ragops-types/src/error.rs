//! Error types shared by the ragops crates.

use thiserror::Error;

/// Errors raised while loading configuration or parsing shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown pipeline step name
    #[error("Unknown step: {0}")]
    UnknownStep(String),
}
