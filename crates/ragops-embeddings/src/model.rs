//! The embedding seam used by the pipeline's `embed` step.

use crate::error::EmbeddingError;

/// Name and output size of an embedder.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    /// Length of every vector the model produces; also the size of the
    /// collections the pipeline creates
    pub dimension: usize,
}

/// Turns chunk text into fixed-size vectors.
pub trait EmbeddingModel: Send + Sync {
    fn info(&self) -> &ModelInfo;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.info().dimension;
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
