//! # ragops-embeddings
//!
//! Deterministic text processing for the build pipeline.
//!
//! ## Features
//! - Character-window chunking with overlap
//! - Stable 64-bit point identities derived from chunk ids
//! - A hash-based pseudo-embedder behind the [`EmbeddingModel`] trait
//!
//! Everything here is pure: the same input always yields the same output,
//! which is what makes re-running a pipeline step idempotent.

pub mod chunking;
pub mod error;
pub mod hash;
pub mod model;

pub use chunking::{chunk_text, truncate_chars, ChunkConfig};
pub use error::EmbeddingError;
pub use hash::{stable_point_id, HashEmbedder};
pub use model::{EmbeddingModel, ModelInfo};
