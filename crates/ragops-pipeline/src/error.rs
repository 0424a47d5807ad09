//! Error types for the build pipeline.

use ragops_embeddings::EmbeddingError;
use ragops_storage::StorageError;
use ragops_types::StepName;
use ragops_vector::VectorError;
use thiserror::Error;

/// Errors that can occur in the build pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Vector backend error
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    /// Embedding generation error
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Documents could not be loaded
    #[error("{0}")]
    Source(String),

    /// A step's input artifact is missing
    #[error("missing artifact for step {0}")]
    MissingArtifact(StepName),

    /// Fault injected for testing
    #[error("Injected failure at {0}")]
    InjectedFault(StepName),

    /// Promotion could not flip the alias
    #[error("promote failed: {0}")]
    Promote(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
