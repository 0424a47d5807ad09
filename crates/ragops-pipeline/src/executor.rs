//! Step executor for index builds.
//!
//! Runs `discover -> chunk -> embed -> upsert -> promote -> smoketest` for a
//! run, persisting each step's status and artifact. A step failure is
//! recorded on the run and stops the remaining steps; only failures to
//! persist run state are returned as errors.

use std::sync::Arc;

use ragops_embeddings::{ChunkConfig, EmbeddingModel};
use ragops_storage::Storage;
use ragops_types::{BuildMessage, Chunk, Document, EmbeddedChunk, Run, RunStatus, StepName, StepState};
use ragops_vector::{Distance, VectorBackend};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::fault::FaultInjector;
use crate::naming::IndexNaming;
use crate::source::DocumentSource;
use crate::steps::{build_points, chunk_documents, embed_chunks, SmoketestResult, SMOKETEST_QUERIES};
use crate::versions::AliasManager;

/// Configuration for the step executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Chunking window and overlap
    pub chunk: ChunkConfig,
    /// Points per upsert request
    pub upsert_batch_size: usize,
    /// Characters of chunk text kept in embed artifacts and point payloads
    pub text_limit: usize,
    /// Hits requested per smoketest query
    pub smoketest_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            upsert_batch_size: 128,
            text_limit: 200,
            smoketest_limit: 3,
        }
    }
}

impl ExecutorConfig {
    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    /// Set the upsert batch size (at least 1).
    pub fn with_upsert_batch_size(mut self, size: usize) -> Self {
        self.upsert_batch_size = size.max(1);
        self
    }

    pub fn with_text_limit(mut self, limit: usize) -> Self {
        self.text_limit = limit;
        self
    }

    pub fn with_smoketest_limit(mut self, limit: usize) -> Self {
        self.smoketest_limit = limit;
        self
    }
}

/// What the executor did with a build message.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// An attempt ran; the run ended `SUCCEEDED` or `FAILED`
    Completed(Run),
    /// Redelivery of a build whose run had already finished
    Skipped(Run),
}

impl BuildOutcome {
    pub fn run(&self) -> &Run {
        match self {
            BuildOutcome::Completed(run) | BuildOutcome::Skipped(run) => run,
        }
    }

    pub fn into_run(self) -> Run {
        match self {
            BuildOutcome::Completed(run) | BuildOutcome::Skipped(run) => run,
        }
    }
}

/// Executes build runs.
pub struct StepExecutor {
    storage: Arc<Storage>,
    backend: Arc<dyn VectorBackend>,
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn EmbeddingModel>,
    aliases: AliasManager,
    faults: FaultInjector,
    naming: IndexNaming,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(
        storage: Arc<Storage>,
        backend: Arc<dyn VectorBackend>,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn EmbeddingModel>,
        naming: IndexNaming,
    ) -> Self {
        let aliases = AliasManager::new(storage.clone(), backend.clone(), naming.clone());
        let faults = FaultInjector::new(storage.clone());
        Self {
            storage,
            backend,
            source,
            embedder,
            aliases,
            faults,
            naming,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Alias manager sharing this executor's storage and backend.
    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Handle one build or replay message.
    ///
    /// Creates the run if the enqueuing side never stored it. A build
    /// message for a run that already finished is a redelivery and leaves
    /// the run untouched, as is a replay whose key matches the replay that
    /// last ran on a finished run. Anything else starts a new attempt.
    pub async fn run_build(&self, msg: &BuildMessage) -> Result<BuildOutcome, PipelineError> {
        let version = match msg.version {
            Some(version) => version,
            None => self.storage.get_history(&msg.index)?.next_version(),
        };

        let (run, created) = self.storage.get_or_create_run(&msg.run_id, || {
            Run::queued(
                &msg.run_id,
                &msg.index,
                &msg.dataset,
                version,
                msg.fail_step,
                msg.fail_mode,
            )
        })?;
        if created {
            info!(run_id = %run.run_id, index = %run.index, version = run.version, "Created run on first dispatch");
        }

        let key = msg.idempotency_key();
        let redelivered = run.status.is_terminal()
            && (!msg.is_replay() || run.last_replay_key.as_deref() == Some(key.as_str()));
        if redelivered {
            let kind = if msg.is_replay() { "replay" } else { "build" };
            info!(run_id = %run.run_id, status = %run.status, key = %key, "Ignoring redelivered {}", kind);
            self.log(
                &run.run_id,
                &format!("Redelivered {} ignored (status={})", kind, run.status),
            );
            return Ok(BuildOutcome::Skipped(run));
        }

        let start = msg.start_step();
        let run = self.storage.update_run(&msg.run_id, |run| {
            run.attempt += 1;
            run.status = RunStatus::Running;
            if msg.is_replay() {
                for step in StepName::ORDER.iter().filter(|step| **step >= start) {
                    run.set_step(*step, StepState::Pending);
                }
                run.fail_step = msg.fail_step;
                run.fail_mode = msg.fail_mode;
                run.last_replay_key = Some(key.clone());
            }
        })?;

        info!(
            run_id = %run.run_id,
            index = %run.index,
            version = run.version,
            from_step = %start,
            attempt = run.attempt,
            "Starting build"
        );
        self.log(
            &run.run_id,
            &format!("Starting build (from_step={}, attempt={})", start, run.attempt),
        );

        let run = self.execute(run, start, msg.is_replay()).await?;
        Ok(BuildOutcome::Completed(run))
    }

    /// Run the pipeline from `start` for an already claimed run.
    ///
    /// Steps before `start` keep their recorded status. Data steps reuse a
    /// stored artifact unless this attempt is a replay.
    pub async fn execute(
        &self,
        run: Run,
        start: StepName,
        replay: bool,
    ) -> Result<Run, PipelineError> {
        let run_id = run.run_id.clone();

        for step in StepName::ORDER {
            if step < start {
                self.log(&run_id, &format!("{}: skipped (cached)", step));
                continue;
            }

            let current = self
                .storage
                .update_run(&run_id, |r| r.set_step(step, StepState::Running))?;

            match self.run_step(&current, step, replay).await {
                Ok(reference) => {
                    debug!(run_id = %run_id, step = %step, artifact = %reference, "Step succeeded");
                    self.storage.update_run(&run_id, |r| {
                        r.set_step(step, StepState::Succeeded);
                        r.artifacts.insert(step, reference);
                    })?;
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(run_id = %run_id, step = %step, error = %message, "Step failed");
                    self.log(&run_id, &format!("{}: FAILED: {}", step, message));
                    return Ok(self.storage.update_run(&run_id, |r| {
                        r.set_step(step, StepState::Failed);
                        r.fail(step.as_str(), message.as_str());
                    })?);
                }
            }
        }

        let run = self
            .storage
            .update_run(&run_id, |r| r.status = RunStatus::Succeeded)?;
        info!(run_id = %run_id, index = %run.index, version = run.version, "Build succeeded");
        self.log(&run_id, "Build succeeded");
        Ok(run)
    }

    /// Execute one step and return its artifact reference.
    async fn run_step(
        &self,
        run: &Run,
        step: StepName,
        replay: bool,
    ) -> Result<String, PipelineError> {
        if self
            .faults
            .should_fail(&run.run_id, run.fail_step, run.fail_mode, step)?
        {
            return Err(PipelineError::InjectedFault(step));
        }

        if !replay && step.is_cacheable() && self.storage.has_artifact(&run.run_id, step)? {
            self.log(&run.run_id, &format!("{}: using cached output", step));
            return Ok(ragops_storage::ArtifactKey::new(&run.run_id, step).reference());
        }

        match step {
            StepName::Discover => self.discover(run),
            StepName::Chunk => self.chunk(run),
            StepName::Embed => self.embed(run),
            StepName::Upsert => self.upsert(run).await,
            StepName::Promote => self.promote(run).await,
            StepName::Smoketest => self.smoketest(run).await,
        }
    }

    fn discover(&self, run: &Run) -> Result<String, PipelineError> {
        let docs = self.source.load(&run.dataset)?;
        let reference = self.store(&run.run_id, StepName::Discover, &docs)?;
        self.log(&run.run_id, &format!("discover: found {} docs", docs.len()));
        Ok(reference)
    }

    fn chunk(&self, run: &Run) -> Result<String, PipelineError> {
        let docs: Vec<Document> = self.load(&run.run_id, StepName::Discover)?;
        let chunks = chunk_documents(&docs, &self.config.chunk);
        let reference = self.store(&run.run_id, StepName::Chunk, &chunks)?;
        self.log(
            &run.run_id,
            &format!("chunk: produced {} chunks", chunks.len()),
        );
        Ok(reference)
    }

    fn embed(&self, run: &Run) -> Result<String, PipelineError> {
        let chunks: Vec<Chunk> = self.load(&run.run_id, StepName::Chunk)?;
        let embeds = embed_chunks(&chunks, self.embedder.as_ref(), self.config.text_limit)?;
        let reference = self.store(&run.run_id, StepName::Embed, &embeds)?;
        self.log(
            &run.run_id,
            &format!(
                "embed: generated {} embeddings (dim={})",
                embeds.len(),
                self.embedder.info().dimension
            ),
        );
        Ok(reference)
    }

    async fn upsert(&self, run: &Run) -> Result<String, PipelineError> {
        let embeds: Vec<EmbeddedChunk> = self.load(&run.run_id, StepName::Embed)?;
        let collection = self.naming.collection_name(&run.index, run.version);

        self.backend
            .create_collection(&collection, self.embedder.info().dimension, Distance::Cosine)
            .await?;

        let points = build_points(&embeds);
        for batch in points.chunks(self.config.upsert_batch_size) {
            self.backend.upsert_points(&collection, batch).await?;
            debug!(run_id = %run.run_id, collection = %collection, batch = batch.len(), "Upserted batch");
        }

        self.log(
            &run.run_id,
            &format!("upsert: wrote {} points to {}", points.len(), collection),
        );
        Ok(collection)
    }

    async fn promote(&self, run: &Run) -> Result<String, PipelineError> {
        let outcome = self.aliases.promote(&run.index, run.version).await?;
        let collection = outcome
            .collection
            .unwrap_or_else(|| self.naming.collection_name(&run.index, run.version));
        let reference = format!("{} -> {}", self.naming.alias_name(&run.index), collection);
        self.log(&run.run_id, &format!("promote: {}", reference));
        Ok(reference)
    }

    async fn smoketest(&self, run: &Run) -> Result<String, PipelineError> {
        let alias = self.naming.alias_name(&run.index);
        let mut results = Vec::with_capacity(SMOKETEST_QUERIES.len());
        for query in SMOKETEST_QUERIES {
            let vector = self.embedder.embed(query)?;
            let hits = self
                .backend
                .search(&alias, &vector, self.config.smoketest_limit)
                .await?;
            results.push(SmoketestResult {
                query: query.to_string(),
                hits,
            });
        }
        let reference = self.store(&run.run_id, StepName::Smoketest, &results)?;
        self.log(
            &run.run_id,
            &format!("smoketest: ran {} queries against {}", results.len(), alias),
        );
        Ok(reference)
    }

    fn store<T: Serialize>(
        &self,
        run_id: &str,
        step: StepName,
        value: &T,
    ) -> Result<String, PipelineError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.storage.put_artifact(run_id, step, &bytes)?)
    }

    fn load<T: DeserializeOwned>(&self, run_id: &str, step: StepName) -> Result<T, PipelineError> {
        let bytes = self
            .storage
            .get_artifact(run_id, step)?
            .ok_or(PipelineError::MissingArtifact(step))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Append to the run log. A failed append is not a step failure.
    fn log(&self, run_id: &str, line: &str) {
        if let Err(e) = self.storage.append_log(run_id, line) {
            warn!(run_id = %run_id, error = %e, "Failed to append run log");
        }
    }
}
