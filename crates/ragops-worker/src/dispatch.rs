//! Topic handlers.
//!
//! The build topic carries build and replay messages for the step executor.
//! The control topic carries rollbacks for the alias manager. A message of
//! the wrong kind for its topic is rejected and nacked.

use std::sync::Arc;

use async_trait::async_trait;
use ragops_pipeline::{AliasManager, BuildOutcome, StepExecutor};
use ragops_types::ControlMessage;
use tracing::{info, warn};

use crate::consumer::MessageHandler;
use crate::error::WorkerError;

/// Runs build messages through the step executor.
///
/// A run that ends `FAILED` is still a handled message: the failure is
/// recorded on the run and the delivery is acked.
pub struct BuildHandler {
    executor: Arc<StepExecutor>,
}

impl BuildHandler {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl MessageHandler for BuildHandler {
    async fn handle(&self, message: ControlMessage) -> Result<(), WorkerError> {
        let build = match message {
            ControlMessage::Build(build) => build,
            other => {
                return Err(WorkerError::UnexpectedMessage {
                    expected: "build",
                    actual: other.kind(),
                })
            }
        };

        match self.executor.run_build(&build).await? {
            BuildOutcome::Completed(run) => {
                info!(run_id = %run.run_id, status = %run.status, attempt = run.attempt, "Build handled");
            }
            BuildOutcome::Skipped(run) => {
                info!(run_id = %run.run_id, status = %run.status, "Build already finished, acking redelivery");
            }
        }
        Ok(())
    }
}

/// Applies rollback messages.
///
/// A rejected rollback (no active version, no such target) is logged and
/// acked; only backend or storage faults cause a nack.
pub struct ControlHandler {
    aliases: AliasManager,
}

impl ControlHandler {
    pub fn new(aliases: AliasManager) -> Self {
        Self { aliases }
    }
}

#[async_trait]
impl MessageHandler for ControlHandler {
    async fn handle(&self, message: ControlMessage) -> Result<(), WorkerError> {
        let rollback = match message {
            ControlMessage::Rollback(rollback) => rollback,
            other => {
                return Err(WorkerError::UnexpectedMessage {
                    expected: "rollback",
                    actual: other.kind(),
                })
            }
        };

        let outcome = self
            .aliases
            .rollback(&rollback.index, rollback.steps, rollback.to_version)
            .await?;
        if outcome.ok {
            info!(index = %outcome.index, active = ?outcome.active, "Rollback applied");
        } else {
            warn!(
                index = %outcome.index,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Rollback rejected"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragops_embeddings::HashEmbedder;
    use ragops_pipeline::{IndexNaming, StaticSource};
    use ragops_storage::Storage;
    use ragops_types::{BuildMessage, RollbackMessage, RunStatus};
    use ragops_vector::MemoryBackend;
    use tempfile::TempDir;

    fn executor() -> (Arc<StepExecutor>, Arc<Storage>, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let executor = StepExecutor::new(
            storage.clone(),
            Arc::new(MemoryBackend::new()),
            Arc::new(StaticSource::from_texts([("a", "alpha text"), ("b", "beta text")])),
            Arc::new(HashEmbedder::new(8).unwrap()),
            IndexNaming::default(),
        );
        (Arc::new(executor), storage, temp)
    }

    #[tokio::test]
    async fn test_build_handler_runs_build() {
        let (executor, storage, _temp) = executor();
        let handler = BuildHandler::new(executor);

        let msg = ControlMessage::Build(BuildMessage::new("r1", "demo", "sample"));
        handler.handle(msg.clone()).await.unwrap();
        assert_eq!(
            storage.get_run("r1").unwrap().unwrap().status,
            RunStatus::Succeeded
        );

        // Redelivery is acked without a new attempt
        handler.handle(msg).await.unwrap();
        assert_eq!(storage.get_run("r1").unwrap().unwrap().attempt, 1);
    }

    #[tokio::test]
    async fn test_handlers_reject_wrong_kind() {
        let (executor, _storage, _temp) = executor();
        let build = BuildHandler::new(executor.clone());
        let control = ControlHandler::new(executor.aliases().clone());

        let err = build
            .handle(ControlMessage::Rollback(RollbackMessage::new("demo", 1, None)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::UnexpectedMessage {
                expected: "build",
                actual: "rollback"
            }
        ));

        let err = control
            .handle(ControlMessage::Build(BuildMessage::new("r1", "demo", "sample")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnexpectedMessage { expected: "rollback", .. }));
    }

    #[tokio::test]
    async fn test_rejected_rollback_is_handled() {
        let (executor, storage, _temp) = executor();
        let control = ControlHandler::new(executor.aliases().clone());

        control
            .handle(ControlMessage::Rollback(RollbackMessage::new("demo", 1, None)))
            .await
            .unwrap();
        assert_eq!(storage.get_history("demo").unwrap().active, None);
    }

    #[tokio::test]
    async fn test_rollback_after_two_builds() {
        let (executor, storage, _temp) = executor();
        let build = BuildHandler::new(executor.clone());
        let control = ControlHandler::new(executor.aliases().clone());

        for run_id in ["r1", "r2"] {
            build
                .handle(ControlMessage::Build(BuildMessage::new(run_id, "demo", "sample")))
                .await
                .unwrap();
        }
        assert_eq!(storage.get_history("demo").unwrap().active, Some(2));

        control
            .handle(ControlMessage::Rollback(RollbackMessage::new("demo", 1, None)))
            .await
            .unwrap();
        let hist = storage.get_history("demo").unwrap();
        assert_eq!(hist.active, Some(1));
        assert_eq!(hist.versions.len(), 2);
    }
}
