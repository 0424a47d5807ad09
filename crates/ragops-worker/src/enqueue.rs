//! Idempotent enqueuer.
//!
//! Produces build, replay and rollback messages with idempotency keys that
//! are stable for logically identical requests, so a retried enqueue never
//! creates a second run. A failed enqueue is recorded on the run.

use std::sync::Arc;
use std::time::Duration;

use ragops_queue::QueueTransport;
use ragops_storage::Storage;
use ragops_types::{
    BuildMessage, ControlMessage, FailMode, FailStep, RollbackMessage, Run, StepName,
    DEFAULT_DATASET, DEFAULT_INDEX,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::error::WorkerError;

/// A new build to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub index: String,
    pub dataset: String,
    pub fail_step: FailStep,
    pub fail_mode: FailMode,
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            index: DEFAULT_INDEX.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            fail_step: FailStep::none(),
            fail_mode: FailMode::Never,
        }
    }
}

impl BuildRequest {
    pub fn new(index: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn with_fault(mut self, fail_step: FailStep, fail_mode: FailMode) -> Self {
        self.fail_step = fail_step;
        self.fail_mode = fail_mode;
        self
    }
}

/// Produces pipeline messages onto the build and control topics.
#[derive(Clone)]
pub struct Enqueuer {
    transport: Arc<dyn QueueTransport>,
    storage: Arc<Storage>,
    build_topic: String,
    control_topic: String,
    partitions: u32,
    record_runs: bool,
}

impl Enqueuer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        storage: Arc<Storage>,
        build_topic: impl Into<String>,
        control_topic: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            storage,
            build_topic: build_topic.into(),
            control_topic: control_topic.into(),
            partitions: 1,
            record_runs: true,
        }
    }

    /// Whether to write run records. Without them (a read-only store) the
    /// worker creates the run when it first handles the build, and enqueue
    /// failures are only reported to the caller.
    pub fn with_run_records(mut self, record_runs: bool) -> Self {
        self.record_runs = record_runs;
        self
    }

    pub fn build_topic(&self) -> &str {
        &self.build_topic
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    /// Create both topics (existing topics are fine).
    pub async fn ensure_topics(&self) -> Result<(), WorkerError> {
        for topic in [&self.build_topic, &self.control_topic] {
            self.transport.ensure_topic(topic, self.partitions).await?;
        }
        Ok(())
    }

    /// [`Self::ensure_topics`], retried every `interval` until `timeout`
    /// has passed.
    pub async fn ensure_topics_with_retry(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), WorkerError> {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.ensure_topics().await {
                Ok(()) => {
                    info!(
                        build_topic = %self.build_topic,
                        control_topic = %self.control_topic,
                        attempts,
                        "Topics ready"
                    );
                    return Ok(());
                }
                Err(e) if Instant::now() + interval > deadline => {
                    error!(attempts, error = %e, "Giving up on topic provisioning");
                    return Err(WorkerError::TopicsUnavailable(e.to_string()));
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Topic provisioning failed, retrying");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Produce one message with its idempotency key.
    pub async fn enqueue(&self, topic: &str, message: &ControlMessage) -> Result<Value, WorkerError> {
        let key = message.idempotency_key();
        let value = message.to_value()?;
        let ack = self.transport.produce(topic, &value, Some(&key)).await?;
        info!(topic = %topic, kind = message.kind(), key = %key, "Enqueued message");
        Ok(ack)
    }

    /// Create a `QUEUED` run for the next version of the index and enqueue
    /// its build.
    ///
    /// The version is fixed here from the index history, so two builds
    /// enqueued before either is promoted get the same version.
    pub async fn submit_build(&self, request: BuildRequest) -> Result<Run, WorkerError> {
        let run_id = Ulid::new().to_string();
        let version = self.storage.get_history(&request.index)?.next_version();
        let run = Run::queued(
            &run_id,
            &request.index,
            &request.dataset,
            version,
            request.fail_step,
            request.fail_mode,
        );
        if self.record_runs {
            self.storage.create_run(&run)?;
            self.append_log(&run_id, &format!("Queued build (version={})", version));
        }

        let message = BuildMessage::new(&run_id, &request.index, &request.dataset)
            .with_version(version)
            .with_fault(request.fail_step, request.fail_mode);
        self.enqueue_for_run(&run_id, &self.build_topic, ControlMessage::Build(message))
            .await?;
        Ok(run)
    }

    /// Enqueue a replay of an existing run from `from_step`.
    pub async fn submit_replay(
        &self,
        run_id: &str,
        from_step: StepName,
        fail_step: FailStep,
        fail_mode: FailMode,
    ) -> Result<Run, WorkerError> {
        let run = self
            .storage
            .get_run(run_id)?
            .ok_or_else(|| WorkerError::UnknownRun(run_id.to_string()))?;

        let message = BuildMessage::new(&run.run_id, &run.index, &run.dataset)
            .with_version(run.version)
            .with_from_step(from_step)
            .with_fault(fail_step, fail_mode);
        self.append_log(run_id, &format!("Queued replay (from_step={})", from_step));
        self.enqueue_for_run(run_id, &self.build_topic, ControlMessage::Build(message))
            .await?;
        Ok(run)
    }

    /// Enqueue a rollback on the control topic.
    pub async fn submit_rollback(&self, rollback: RollbackMessage) -> Result<Value, WorkerError> {
        self.enqueue(&self.control_topic, &ControlMessage::Rollback(rollback))
            .await
    }

    async fn enqueue_for_run(
        &self,
        run_id: &str,
        topic: &str,
        message: ControlMessage,
    ) -> Result<Value, WorkerError> {
        match self.enqueue(topic, &message).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                error!(run_id = %run_id, topic = %topic, error = %e, "Enqueue failed");
                if self.record_runs {
                    let reason = format!("enqueue failed: {}", e);
                    if let Err(store_err) = self
                        .storage
                        .update_run(run_id, |run| run.fail("enqueue", reason.as_str()))
                    {
                        warn!(run_id = %run_id, error = %store_err, "Could not record enqueue failure");
                    }
                    self.append_log(run_id, &format!("FAILED: {}", reason));
                }
                Err(WorkerError::EnqueueFailed {
                    run_id: run_id.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn append_log(&self, run_id: &str, line: &str) {
        if !self.record_runs {
            return;
        }
        if let Err(e) = self.storage.append_log(run_id, line) {
            warn!(run_id = %run_id, error = %e, "Failed to append run log");
        }
    }
}
