//! Documents flowing through the discover, chunk and embed steps.

use serde::{Deserialize, Serialize};

/// A discovered source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    /// Where the document was read from
    pub path: String,
    pub text: String,
}

/// A chunk of a document. `chunk_id` is `{doc_id}-{n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
}

/// A chunk with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub vector: Vec<f32>,
    /// Chunk text, truncated for storage
    pub text: String,
}
