//! In-process vector backend.
//!
//! Brute-force cosine search over points held in memory. Used by tests and
//! by local runs that have no vector server.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{Distance, Hit, Point, VectorBackend};
use crate::error::VectorError;

#[derive(Debug)]
struct Collection {
    size: usize,
    points: BTreeMap<u64, (Vec<f32>, Value)>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    aliases: HashMap<String, String>,
}

impl State {
    fn resolve(&self, name: &str) -> Option<&Collection> {
        let target = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.collections.get(target)
    }
}

/// In-memory [`VectorBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<State>,
    fail_alias_updates: AtomicBool,
    fail_searches: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set_alias` calls fail (for exercising error paths).
    pub fn set_fail_alias_updates(&self, fail: bool) {
        self.fail_alias_updates.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `search` calls fail.
    pub fn set_fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = state.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of points in a collection (or aliased collection).
    pub fn point_count(&self, name: &str) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.resolve(name).map(|c| c.points.len()).unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        _distance: Distance,
    ) -> Result<(), VectorError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection {
                size: vector_size,
                points: BTreeMap::new(),
            });
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[Point]) -> Result<(), VectorError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let target = state
            .aliases
            .get(collection)
            .cloned()
            .unwrap_or_else(|| collection.to_string());
        let coll = state
            .collections
            .get_mut(&target)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        for point in points {
            if point.vector.len() != coll.size {
                return Err(VectorError::DimensionMismatch {
                    expected: coll.size,
                    actual: point.vector.len(),
                });
            }
        }
        for point in points {
            coll.points
                .insert(point.id, (point.vector.clone(), point.payload.clone()));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<Hit>, VectorError> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(VectorError::Status {
                operation: "search",
                status: 503,
                body: "searches disabled".to_string(),
            });
        }
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let coll = state
            .resolve(collection)
            .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;
        if vector.len() != coll.size {
            return Err(VectorError::DimensionMismatch {
                expected: coll.size,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<Hit> = coll
            .points
            .iter()
            .map(|(id, (stored, payload))| Hit {
                id: Value::from(*id),
                score: cosine(vector, stored),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, VectorError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.aliases.get(alias).cloned())
    }

    async fn set_alias(&self, alias: &str, collection: &str) -> Result<(), VectorError> {
        if self.fail_alias_updates.load(Ordering::SeqCst) {
            return Err(VectorError::Status {
                operation: "set_alias",
                status: 503,
                body: "alias updates disabled".to_string(),
            });
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.collections.contains_key(collection) {
            return Err(VectorError::CollectionNotFound(collection.to_string()));
        }
        state
            .aliases
            .insert(alias.to_string(), collection.to_string());
        Ok(())
    }

    async fn ready(&self) -> Result<bool, VectorError> {
        Ok(true)
    }
}
