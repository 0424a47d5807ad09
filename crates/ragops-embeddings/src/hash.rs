//! SHA-256 based identities and pseudo-embeddings.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::EmbeddingError;
use crate::model::{EmbeddingModel, ModelInfo};

/// Stable 64-bit point identity for a chunk id.
///
/// The first eight bytes of `sha256(chunk_id)`, big endian. The same chunk
/// id always maps to the same point, so re-upserting overwrites instead of
/// duplicating.
pub fn stable_point_id(chunk_id: &str) -> u64 {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Deterministic pseudo-embedder.
///
/// Values are derived from a SHA-256 hash chain over the text and lie in
/// `[0, 1]`. Not semantically meaningful; used to exercise the pipeline
/// without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    info: ModelInfo,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::ZeroDimension);
        }
        debug!(dimension, "Created hash embedder");
        Ok(Self {
            info: ModelInfo {
                name: "sha256-chain".to_string(),
                dimension,
            },
        })
    }
}

impl EmbeddingModel for HashEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let dim = self.info.dimension;
        let mut out = Vec::with_capacity(dim);
        let mut seed = Sha256::digest(text.as_bytes());
        while out.len() < dim {
            seed = Sha256::digest(seed);
            for byte in seed.iter() {
                out.push(f32::from(*byte) / 255.0);
                if out.len() == dim {
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_point_id_known_value() {
        assert_eq!(stable_point_id("doc-0"), 13638422549804477074);
        assert_eq!(stable_point_id("doc-0"), stable_point_id("doc-0"));
        assert_ne!(stable_point_id("doc-0"), stable_point_id("doc-1"));
    }

    #[test]
    fn test_embed_known_prefix() {
        let embedder = HashEmbedder::new(4).unwrap();
        let vector = embedder.embed("hello").unwrap();
        let expected: Vec<f32> = [149u8, 149, 201, 223]
            .iter()
            .map(|b| f32::from(*b) / 255.0)
            .collect();
        assert_eq!(vector, expected);
    }

    #[test]
    fn test_embed_spans_multiple_hashes() {
        let embedder = HashEmbedder::new(80).unwrap();
        let vector = embedder.embed("some text").unwrap();
        assert_eq!(vector.len(), 80);
        assert!(vector.iter().all(|v| (0.0..=1.0).contains(v)));
        embedder.check_dimension(&vector).unwrap();

        // A shorter embedding is a prefix of a longer one
        let short = HashEmbedder::new(16).unwrap().embed("some text").unwrap();
        assert_eq!(&vector[..16], short.as_slice());
    }

    #[test]
    fn test_embed_batch() {
        let embedder = HashEmbedder::new(8).unwrap();
        let vectors = embedder.embed_batch(&["a", "b", "a"]).unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(HashEmbedder::new(0), Err(EmbeddingError::ZeroDimension)));
    }

    #[test]
    fn test_check_dimension_mismatch() {
        let embedder = HashEmbedder::new(8).unwrap();
        assert!(matches!(
            embedder.check_dimension(&[0.0; 3]),
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 3
            })
        ));
    }
}
