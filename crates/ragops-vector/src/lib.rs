//! # ragops-vector
//!
//! Vector backend access for the build pipeline.
//!
//! The [`VectorBackend`] trait covers the operations the pipeline needs:
//! versioned collections, idempotent point upserts, similarity search and
//! alias indirection. Two implementations are provided:
//! - [`QdrantClient`]: HTTP client for a Qdrant-compatible server
//! - [`MemoryBackend`]: in-process backend for tests and local runs

pub mod backend;
pub mod error;
pub mod memory;
pub mod qdrant;

pub use backend::{Distance, Hit, Point, VectorBackend};
pub use error::VectorError;
pub use memory::MemoryBackend;
pub use qdrant::{QdrantClient, VectorClientConfig};
