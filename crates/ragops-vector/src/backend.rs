//! Vector backend trait and wire types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VectorError;

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

/// A point to upsert. Writing a point with an existing id overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Point id as returned by the backend (integer or UUID string)
    pub id: Value,
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

/// Operations the pipeline needs from a vector store.
///
/// `collection` arguments to `upsert_points` and `search` may also name an
/// alias; the backend resolves it.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create a collection. An existing collection is not an error.
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<(), VectorError>;

    /// Write points, overwriting any with the same id.
    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<(), VectorError>;

    /// Nearest neighbours of `vector`, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Hit>, VectorError>;

    /// Collection an alias currently points at, if the alias exists.
    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, VectorError>;

    /// Point `alias` at `collection`, creating or replacing it.
    async fn set_alias(&self, alias: &str, collection: &str) -> Result<(), VectorError>;

    /// Readiness probe.
    async fn ready(&self) -> Result<bool, VectorError>;
}
