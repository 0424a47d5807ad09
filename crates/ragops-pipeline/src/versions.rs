//! Index version history and alias management.
//!
//! Each index has a set of recorded versions and at most one active
//! version. The active version is exposed to readers through a public alias
//! that points at the version's collection.
//!
//! Promotes and rollbacks of one index run one at a time, so the alias and
//! the recorded active version always move together.

use std::sync::Arc;

use dashmap::DashMap;
use ragops_storage::Storage;
use ragops_types::IndexHistory;
use ragops_vector::VectorBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::naming::IndexNaming;

/// Result of a promote or rollback.
///
/// Request-level problems (no active version, no such target) come back as
/// `ok = false` with an `error`. Backend and storage faults are returned as
/// `Err` by the operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl AliasOutcome {
    pub fn success(index: impl Into<String>, active: u32, collection: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            index: index.into(),
            active: Some(active),
            collection: Some(collection.into()),
        }
    }

    pub fn failure(index: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            index: index.into(),
            active: None,
            collection: None,
        }
    }
}

/// History of an index together with where its alias points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub history: IndexHistory,
    pub alias: String,
    pub alias_target: Option<String>,
}

/// Performs promote and rollback for all indexes.
#[derive(Clone)]
pub struct AliasManager {
    storage: Arc<Storage>,
    backend: Arc<dyn VectorBackend>,
    naming: IndexNaming,
    /// Per-index locks, shared by all clones
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AliasManager {
    pub fn new(storage: Arc<Storage>, backend: Arc<dyn VectorBackend>, naming: IndexNaming) -> Self {
        Self {
            storage,
            backend,
            naming,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn naming(&self) -> &IndexNaming {
        &self.naming
    }

    fn index_lock(&self, index: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(index.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Make `version` the active version of `index`.
    ///
    /// Records the version, sets it active, then flips the alias. If the
    /// flip fails the previous active version is restored.
    pub async fn promote(&self, index: &str, version: u32) -> Result<AliasOutcome, PipelineError> {
        let collection = self.naming.collection_name(index, version);
        let alias = self.naming.alias_name(index);

        let lock = self.index_lock(index);
        let _guard = lock.lock().await;
        debug!(index = %index, version, "Acquired index lock for promote");

        let prior = self.storage.update_history(index, |hist| {
            let prior = hist.active;
            hist.set_active(version);
            prior
        })?;

        if let Err(e) = self.backend.set_alias(&alias, &collection).await {
            error!(index = %index, version, error = %e, "Alias flip failed during promote");
            self.storage.update_history(index, |hist| hist.active = prior)?;
            return Err(PipelineError::Promote(format!(
                "{} -> {}: {}",
                alias, collection, e
            )));
        }

        info!(index = %index, version, alias = %alias, collection = %collection, "Promoted version");
        Ok(AliasOutcome::success(index, version, collection))
    }

    /// Move the active version of `index` backwards.
    ///
    /// `to_version`, when given, must be a recorded version. Otherwise the
    /// target is `steps` positions before the active version in recorded
    /// order.
    pub async fn rollback(
        &self,
        index: &str,
        steps: u32,
        to_version: Option<u32>,
    ) -> Result<AliasOutcome, PipelineError> {
        let lock = self.index_lock(index);
        let _guard = lock.lock().await;

        let history = self.storage.get_history(index)?;
        if history.active.is_none() {
            warn!(index = %index, "Rollback rejected: no active version");
            return Ok(AliasOutcome::failure(index, "no active version"));
        }

        let target = match to_version {
            Some(version) if history.contains(version) => version,
            Some(version) => {
                warn!(index = %index, version, "Rollback rejected: unknown version");
                return Ok(AliasOutcome::failure(
                    index,
                    format!("version {} not found", version),
                ));
            }
            None if steps < 1 => {
                return Ok(AliasOutcome::failure(index, "steps must be >= 1"));
            }
            None => match history.previous_version(steps as usize) {
                Some(version) => version,
                None => {
                    warn!(index = %index, steps, "Rollback rejected: no previous version");
                    return Ok(AliasOutcome::failure(index, "no previous version available"));
                }
            },
        };

        let collection = self.naming.collection_name(index, target);
        self.backend
            .set_alias(&self.naming.alias_name(index), &collection)
            .await?;
        self.storage
            .update_history(index, |hist| hist.set_active(target))?;

        info!(index = %index, from = ?history.active, to = target, collection = %collection, "Rolled back");
        Ok(AliasOutcome::success(index, target, collection))
    }

    /// Recorded versions of `index` and its alias target.
    pub async fn index_status(&self, index: &str) -> Result<IndexStatus, PipelineError> {
        let history = self.storage.get_history(index)?;
        let alias = self.naming.alias_name(index);
        let alias_target = self.backend.get_alias_target(&alias).await?;
        Ok(IndexStatus {
            history,
            alias,
            alias_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragops_vector::{Distance, MemoryBackend};
    use tempfile::TempDir;

    struct Fixture {
        manager: AliasManager,
        backend: Arc<MemoryBackend>,
        storage: Arc<Storage>,
        _temp: TempDir,
    }

    async fn fixture(versions: &[u32]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let backend = Arc::new(MemoryBackend::new());
        let naming = IndexNaming::default();
        for v in versions {
            backend
                .create_collection(&naming.collection_name("demo", *v), 4, Distance::Cosine)
                .await
                .unwrap();
        }
        let manager = AliasManager::new(storage.clone(), backend.clone(), naming);
        Fixture {
            manager,
            backend,
            storage,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_promote_then_rollback_round_trip() {
        let f = fixture(&[1, 2]).await;
        f.manager.promote("demo", 1).await.unwrap();
        let outcome = f.manager.promote("demo", 2).await.unwrap();
        assert_eq!(outcome, AliasOutcome::success("demo", 2, "demo_demo_v2"));

        let outcome = f.manager.rollback("demo", 1, None).await.unwrap();
        assert_eq!(outcome, AliasOutcome::success("demo", 1, "demo_demo_v1"));

        let hist = f.storage.get_history("demo").unwrap();
        assert_eq!(hist.active, Some(1));
        assert_eq!(hist.versions.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            f.backend.get_alias_target("demo_demo_active").await.unwrap(),
            Some("demo_demo_v1".to_string())
        );
    }

    #[tokio::test]
    async fn test_rollback_past_oldest() {
        let f = fixture(&[1]).await;
        f.manager.promote("demo", 1).await.unwrap();
        let outcome = f.manager.rollback("demo", 1, None).await.unwrap();
        assert_eq!(
            outcome,
            AliasOutcome::failure("demo", "no previous version available")
        );
    }

    #[tokio::test]
    async fn test_rollback_without_active() {
        let f = fixture(&[]).await;
        let outcome = f.manager.rollback("demo", 1, Some(1)).await.unwrap();
        assert_eq!(outcome, AliasOutcome::failure("demo", "no active version"));
    }

    #[tokio::test]
    async fn test_rollback_to_explicit_version() {
        let f = fixture(&[1, 2, 3]).await;
        for v in [1, 2, 3] {
            f.manager.promote("demo", v).await.unwrap();
        }
        let outcome = f.manager.rollback("demo", 1, Some(1)).await.unwrap();
        assert_eq!(outcome.active, Some(1));

        // Rolling forward again is allowed
        let outcome = f.manager.rollback("demo", 1, Some(3)).await.unwrap();
        assert_eq!(outcome.active, Some(3));

        let outcome = f.manager.rollback("demo", 1, Some(9)).await.unwrap();
        assert_eq!(outcome, AliasOutcome::failure("demo", "version 9 not found"));
    }

    #[tokio::test]
    async fn test_rollback_multiple_steps_and_zero() {
        let f = fixture(&[1, 2, 3]).await;
        for v in [1, 2, 3] {
            f.manager.promote("demo", v).await.unwrap();
        }
        assert_eq!(f.manager.rollback("demo", 2, None).await.unwrap().active, Some(1));
        assert!(!f.manager.rollback("demo", 0, None).await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_failed_alias_flip_restores_active() {
        let f = fixture(&[1, 2]).await;
        f.manager.promote("demo", 1).await.unwrap();

        f.backend.set_fail_alias_updates(true);
        let err = f.manager.promote("demo", 2).await.unwrap_err();
        assert!(matches!(err, PipelineError::Promote(_)));

        let hist = f.storage.get_history("demo").unwrap();
        assert_eq!(hist.active, Some(1));
        assert!(hist.contains(2));
    }

    #[tokio::test]
    async fn test_failed_rollback_flip_keeps_active() {
        let f = fixture(&[1, 2]).await;
        f.manager.promote("demo", 1).await.unwrap();
        f.manager.promote("demo", 2).await.unwrap();

        f.backend.set_fail_alias_updates(true);
        assert!(f.manager.rollback("demo", 1, None).await.is_err());
        assert_eq!(f.storage.get_history("demo").unwrap().active, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_promote_and_rollback_keep_alias_in_sync() {
        let f = fixture(&[1, 2, 3]).await;
        f.manager.promote("demo", 1).await.unwrap();
        f.manager.promote("demo", 2).await.unwrap();

        for _ in 0..50 {
            let promote = {
                let manager = f.manager.clone();
                tokio::spawn(async move { manager.promote("demo", 3).await })
            };
            let rollback = {
                let manager = f.manager.clone();
                tokio::spawn(async move { manager.rollback("demo", 1, None).await })
            };
            let (promoted, rolled_back) = tokio::join!(promote, rollback);
            promoted.unwrap().unwrap();
            rolled_back.unwrap().unwrap();

            let active = f.storage.get_history("demo").unwrap().active.unwrap();
            assert_eq!(
                f.backend.get_alias_target("demo_demo_active").await.unwrap(),
                Some(f.manager.naming().collection_name("demo", active))
            );
        }
    }

    #[tokio::test]
    async fn test_index_status() {
        let f = fixture(&[1]).await;
        f.manager.promote("demo", 1).await.unwrap();
        let status = f.manager.index_status("demo").await.unwrap();
        assert_eq!(status.alias, "demo_demo_active");
        assert_eq!(status.alias_target, Some("demo_demo_v1".to_string()));
        assert_eq!(status.history.active, Some(1));
    }
}
