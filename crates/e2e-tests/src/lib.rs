//! End-to-end test infrastructure for ragops.
//!
//! Provides a shared TestHarness wiring the real storage, executor, alias
//! manager, enqueuer and consumer loops to the in-process queue and vector
//! backend, so tests can drive builds from enqueue to alias flip.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ragops_embeddings::HashEmbedder;
use ragops_pipeline::{AliasManager, IndexNaming, StaticSource, StepExecutor};
use ragops_queue::MemoryQueue;
use ragops_storage::Storage;
use ragops_types::{IndexHistory, Run, Settings};
use ragops_vector::MemoryBackend;
use ragops_worker::{
    BuildHandler, ConsumerConfig, ConsumerLoop, ControlHandler, Enqueuer, LoopStats, WorkerError,
};

/// How long `wait_*` helpers poll before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Three short documents, one chunk each, matching the smoketest queries.
pub const SAMPLE_DOCS: [(&str, &str); 3] = [
    (
        "distributed",
        "Distributed systems retry failed calls with exponential backoff.",
    ),
    (
        "versioning",
        "A RAG index is rebuilt into a new versioned collection and promoted by alias.",
    ),
    (
        "security",
        "API security starts with authentication and scoped auth tokens.",
    ),
];

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub settings: Settings,
    pub storage: Arc<Storage>,
    pub backend: Arc<MemoryBackend>,
    pub queue: MemoryQueue,
    pub executor: Arc<StepExecutor>,
    pub enqueuer: Enqueuer,
}

impl TestHarness {
    /// Harness serving [`SAMPLE_DOCS`] for every dataset.
    pub fn new() -> Self {
        Self::with_source(StaticSource::from_texts(SAMPLE_DOCS))
    }

    pub fn with_source(source: StaticSource) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));
        let settings = Settings::default();
        let backend = Arc::new(MemoryBackend::new());
        let queue = MemoryQueue::new();

        let executor = StepExecutor::new(
            storage.clone(),
            backend.clone(),
            Arc::new(source),
            Arc::new(HashEmbedder::new(settings.embed_dim).expect("Invalid embed_dim")),
            IndexNaming::new(&settings.name_prefix),
        );
        let enqueuer = Enqueuer::new(
            Arc::new(queue.clone()),
            storage.clone(),
            &settings.build_topic,
            &settings.control_topic,
        );

        Self {
            _temp_dir: temp_dir,
            settings,
            storage,
            backend,
            queue,
            executor: Arc::new(executor),
            enqueuer,
        }
    }

    pub fn aliases(&self) -> &AliasManager {
        self.executor.aliases()
    }

    pub fn naming(&self) -> &IndexNaming {
        self.aliases().naming()
    }

    pub fn history(&self, index: &str) -> IndexHistory {
        self.storage.get_history(index).expect("Failed to read history")
    }

    pub fn logs(&self, run_id: &str) -> Vec<String> {
        self.storage.get_logs(run_id).expect("Failed to read run log")
    }

    /// Create both topics on the in-process queue.
    pub async fn ensure_topics(&self) {
        self.enqueuer
            .ensure_topics()
            .await
            .expect("Failed to create topics");
    }

    /// Provision topics and start the build and control consumer loops.
    pub async fn start_worker(&self) -> WorkerHandle {
        self.ensure_topics().await;

        let shutdown = CancellationToken::new();
        let config = ConsumerConfig::from_settings(&self.settings)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50));
        let consumer = ConsumerLoop::new(Arc::new(self.queue.clone()), config, shutdown.clone());

        let build = {
            let consumer = consumer.clone();
            let topic = self.settings.build_topic.clone();
            let handler = Arc::new(BuildHandler::new(self.executor.clone()));
            tokio::spawn(async move { consumer.run(&topic, handler).await })
        };
        let control = {
            let topic = self.settings.control_topic.clone();
            let handler = Arc::new(ControlHandler::new(self.aliases().clone()));
            tokio::spawn(async move { consumer.run(&topic, handler).await })
        };

        WorkerHandle {
            shutdown,
            tasks: vec![build, control],
        }
    }

    /// Poll the run record until `done` holds.
    pub async fn wait_for_run<F>(&self, run_id: &str, done: F) -> Run
    where
        F: Fn(&Run) -> bool,
    {
        let storage = self.storage.clone();
        wait_until(|| {
            let run = storage.get_run(run_id).expect("Failed to read run");
            std::future::ready(run.filter(|r| done(r)))
        })
        .await
        .unwrap_or_else(|| panic!("Run {} did not reach the expected state", run_id))
    }

    /// Poll until `count` messages on `topic` have been acked.
    pub async fn wait_for_acks(&self, topic: &str, count: usize) {
        let queue = self.queue.clone();
        wait_until(|| std::future::ready((queue.acked(topic).len() >= count).then_some(())))
            .await
            .unwrap_or_else(|| panic!("Expected {} acks on {}", count, topic));
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Running consumer loops of a harness.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<Result<LoopStats, WorkerError>>>,
}

impl WorkerHandle {
    /// Cancel both loops and return their stats (build topic first).
    pub async fn stop(self) -> Vec<LoopStats> {
        self.shutdown.cancel();
        let mut stats = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            let result = task.await.expect("Consumer task panicked");
            stats.push(result.expect("Consumer loop failed"));
        }
        stats
    }
}

async fn wait_until<T, F, Fut>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
