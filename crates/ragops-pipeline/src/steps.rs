//! Pure data transformations behind the pipeline steps.

use ragops_embeddings::{chunk_text, stable_point_id, truncate_chars, ChunkConfig, EmbeddingModel};
use ragops_types::{Chunk, Document, EmbeddedChunk};
use ragops_vector::{Hit, Point};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PipelineError;

/// Queries issued against a freshly promoted alias.
pub const SMOKETEST_QUERIES: [&str; 3] = [
    "distributed systems retries",
    "rag index versioning",
    "api security auth",
];

/// Hits returned for one smoketest query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoketestResult {
    pub query: String,
    pub hits: Vec<Hit>,
}

/// Split every document into chunks with ids `{doc_id}-{n}`.
pub fn chunk_documents(docs: &[Document], config: &ChunkConfig) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|doc| {
            chunk_text(&doc.text, config)
                .into_iter()
                .enumerate()
                .map(move |(n, text)| Chunk {
                    chunk_id: format!("{}-{}", doc.doc_id, n),
                    doc_id: doc.doc_id.clone(),
                    text,
                })
        })
        .collect()
}

/// Embed every chunk, keeping at most `text_limit` characters of its text.
pub fn embed_chunks(
    chunks: &[Chunk],
    model: &dyn EmbeddingModel,
    text_limit: usize,
) -> Result<Vec<EmbeddedChunk>, PipelineError> {
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = model.embed_batch(&texts)?;
    Ok(chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddedChunk {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            vector,
            text: truncate_chars(&chunk.text, text_limit),
        })
        .collect())
}

/// Vector points for embedded chunks. The point id depends only on the
/// chunk id.
pub fn build_points(embeds: &[EmbeddedChunk]) -> Vec<Point> {
    embeds
        .iter()
        .map(|e| Point {
            id: stable_point_id(&e.chunk_id),
            vector: e.vector.clone(),
            payload: json!({
                "chunk_id": e.chunk_id,
                "doc_id": e.doc_id,
                "text": e.text,
            }),
        })
        .collect()
}
