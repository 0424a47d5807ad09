//! Command implementations for ragops.
//!
//! `worker` runs both consumer loops until Ctrl-C or SIGTERM. The other
//! commands are short-lived operator tools that print JSON to stdout.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ragops_embeddings::HashEmbedder;
use ragops_pipeline::{AliasManager, DirectorySource, ExecutorConfig, IndexNaming, StepExecutor};
use ragops_queue::{HttpQueueClient, QueueClientConfig, QueueTransport};
use ragops_storage::Storage;
use ragops_types::{FailMode, FailStep, RollbackMessage, Run, RunStatus, Settings, StepName};
use ragops_vector::{QdrantClient, VectorBackend, VectorClientConfig};
use ragops_worker::{
    BuildHandler, BuildRequest, ConsumerConfig, ConsumerLoop, ControlHandler, Enqueuer,
    LoopStats, MessageHandler, WorkerError,
};

use crate::cli::Cli;

const TOPIC_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const TOPIC_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Load configuration, apply CLI overrides and install logging.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_overrides(&mut settings, cli);
    settings.validate().context("Invalid configuration")?;
    init_logging(&settings)?;
    Ok(settings)
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(db_path) = &cli.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(queue_url) = &cli.queue_url {
        settings.queue_url = queue_url.clone();
    }
    if let Some(vector_url) = &cli.vector_url {
        settings.vector_url = vector_url.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
}

fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn queue_client(settings: &Settings) -> Result<Arc<dyn QueueTransport>> {
    let client = HttpQueueClient::new(QueueClientConfig::new(&settings.queue_url))
        .context("Failed to create queue client")?;
    Ok(Arc::new(client))
}

fn vector_client(settings: &Settings) -> Result<Arc<dyn VectorBackend>> {
    let client = QdrantClient::new(VectorClientConfig::new(&settings.vector_url))
        .context("Failed to create vector client")?;
    Ok(Arc::new(client))
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).context("Failed to open storage")?;
    Ok(Arc::new(storage))
}

fn open_storage_read_only(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    let storage = Storage::open_read_only(&db_path)
        .with_context(|| format!("Failed to open storage at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

/// Enqueuer for operator commands.
///
/// A running worker holds the database lock. Without `require_records` the
/// enqueuer then falls back to a read-only view and leaves run creation to
/// the worker. With it, the command is refused, since an enqueue failure
/// could not be recorded on the run.
fn operator_enqueuer(
    settings: &Settings,
    transport: Arc<dyn QueueTransport>,
    require_records: bool,
) -> Result<Enqueuer> {
    let (storage, record_runs) = match open_storage(settings) {
        Ok(storage) => (storage, true),
        Err(e) if require_records => {
            return Err(e.context(format!(
                "Run store at {} is locked by a running worker; \
                 replay needs write access to record enqueue failures on the run",
                settings.db_path
            )));
        }
        Err(e) => {
            warn!(error = %e, "Store is busy, enqueueing without run records");
            (open_storage_read_only(settings)?, false)
        }
    };
    Ok(Enqueuer::new(
        transport,
        storage,
        &settings.build_topic,
        &settings.control_topic,
    )
    .with_run_records(record_runs))
}

/// Run the build and control consumer loops until shutdown.
///
/// Startup:
/// 1. Open RocksDB storage
/// 2. Connect the queue and vector clients
/// 3. Provision both topics (retried for up to a minute)
/// 4. Spawn one consumer loop per topic
/// 5. Cancel both loops on SIGINT/SIGTERM, or when either loop gives up
/// 6. Flush storage
pub async fn run_worker(settings: Settings, docs_dir_override: Option<&str>) -> Result<()> {
    let docs_dir = docs_dir_override
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.expanded_docs_dir());

    info!("ragops worker starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Queue URL: {}", settings.queue_url);
    info!("  Vector URL: {}", settings.vector_url);
    info!("  Documents: {:?}", docs_dir);
    info!(
        "  Topics: {} / {} (group {})",
        settings.build_topic, settings.control_topic, settings.worker_group
    );

    let storage = open_storage(&settings)?;
    let transport = queue_client(&settings)?;
    let backend = vector_client(&settings)?;
    let embedder = HashEmbedder::new(settings.embed_dim).context("Invalid embedding dimension")?;

    let executor = StepExecutor::new(
        storage.clone(),
        backend,
        Arc::new(DirectorySource::new(docs_dir)),
        Arc::new(embedder),
        IndexNaming::new(&settings.name_prefix),
    )
    .with_config(ExecutorConfig::default().with_upsert_batch_size(settings.upsert_batch_size));
    let executor = Arc::new(executor);

    Enqueuer::new(
        transport.clone(),
        storage.clone(),
        &settings.build_topic,
        &settings.control_topic,
    )
    .ensure_topics_with_retry(TOPIC_RETRY_INTERVAL, TOPIC_RETRY_TIMEOUT)
    .await
    .context("Failed to provision topics")?;

    let shutdown = CancellationToken::new();
    let consumer = ConsumerLoop::new(
        transport,
        ConsumerConfig::from_settings(&settings),
        shutdown.clone(),
    );

    let build_task = spawn_loop(
        consumer.clone(),
        settings.build_topic.clone(),
        Arc::new(BuildHandler::new(executor.clone())),
        shutdown.clone(),
    );
    let control_task = spawn_loop(
        consumer,
        settings.control_topic.clone(),
        Arc::new(ControlHandler::new(executor.aliases().clone())),
        shutdown.clone(),
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => signal_token.cancel(),
            _ = signal_token.cancelled() => {}
        }
    });

    let (build, control) = tokio::join!(build_task, control_task);

    let mut failure = None;
    for (topic, joined) in [
        (&settings.build_topic, build),
        (&settings.control_topic, control),
    ] {
        match joined {
            Ok(Ok(stats)) => {
                info!(
                    topic = %topic,
                    acked = stats.acked,
                    nacked = stats.nacked,
                    reconnects = stats.reconnects,
                    "Consumer loop stopped"
                );
            }
            Ok(Err(e)) => {
                failure.get_or_insert_with(|| anyhow::anyhow!("Consumer for {} failed: {}", topic, e));
            }
            Err(e) => {
                failure.get_or_insert_with(|| anyhow::anyhow!("Consumer for {} aborted: {}", topic, e));
            }
        }
    }

    if let Err(e) = storage.flush() {
        warn!(error = %e, "Failed to flush storage on shutdown");
    }
    info!("ragops worker stopped");
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn_loop(
    consumer: ConsumerLoop,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<LoopStats, WorkerError>> {
    tokio::spawn(async move {
        let result = consumer.run(&topic, handler).await;
        if let Err(e) = &result {
            error!(topic = %topic, error = %e, "Consumer loop terminated");
            shutdown.cancel();
        }
        result
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Enqueue a build of the next version of `index`.
pub async fn submit_build(
    settings: &Settings,
    index: String,
    dataset: String,
    fail_step: FailStep,
    fail_mode: FailMode,
) -> Result<()> {
    let enqueuer = operator_enqueuer(settings, queue_client(settings)?, false)?;
    let run = enqueuer
        .submit_build(BuildRequest::new(index, dataset).with_fault(fail_step, fail_mode))
        .await
        .context("Build was not enqueued")?;
    print_json(&enqueued_json(&run, enqueuer.build_topic()))
}

/// Enqueue a replay of `run_id` starting at `from_step`.
pub async fn submit_replay(
    settings: &Settings,
    run_id: &str,
    from_step: StepName,
    fail_step: FailStep,
    fail_mode: FailMode,
) -> Result<()> {
    let enqueuer = operator_enqueuer(settings, queue_client(settings)?, true)?;
    let run = enqueuer
        .submit_replay(run_id, from_step, fail_step, fail_mode)
        .await
        .context("Replay was not enqueued")?;
    let mut out = enqueued_json(&run, enqueuer.build_topic());
    out["from_step"] = json!(from_step);
    print_json(&out)
}

/// Enqueue a rollback on the control topic.
pub async fn submit_rollback(
    settings: &Settings,
    index: String,
    steps: u32,
    to_version: Option<u32>,
) -> Result<()> {
    let enqueuer = operator_enqueuer(settings, queue_client(settings)?, false)?;
    let rollback = RollbackMessage::new(index, steps, to_version);
    let ack = enqueuer
        .submit_rollback(rollback.clone())
        .await
        .context("Rollback was not enqueued")?;
    print_json(&json!({
        "enqueued": true,
        "topic": enqueuer.control_topic(),
        "index": rollback.index,
        "steps": rollback.steps,
        "to_version": rollback.to_version,
        "ack": ack,
    }))
}

/// Print a run's record and log, or `UNKNOWN` for an unknown id.
pub fn show_status(settings: &Settings, run_id: &str) -> Result<()> {
    let storage = open_storage_read_only(settings)?;
    print_json(&run_report(&storage, run_id)?)
}

/// Print an index's version history and current alias target.
pub async fn show_index(settings: &Settings, index: &str) -> Result<()> {
    let storage = open_storage_read_only(settings)?;
    let aliases = AliasManager::new(
        storage,
        vector_client(settings)?,
        IndexNaming::new(&settings.name_prefix),
    );
    let status = aliases
        .index_status(index)
        .await
        .context("Failed to read index status")?;
    print_json(&json!({
        "index": status.history.index,
        "versions": status.history.versions,
        "active": status.history.active,
        "alias": status.alias,
        "alias_target": status.alias_target,
    }))
}

/// Check the queue and vector services and report run store statistics.
/// Fails if either service is not healthy.
pub async fn check_health(settings: &Settings) -> Result<()> {
    let queue = match queue_client(settings)?.healthz().await {
        Ok(healthy) => json!({ "ok": healthy }),
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    };
    let vector = match vector_client(settings)?.ready().await {
        Ok(ready) => json!({ "ok": ready }),
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    };
    let healthy = queue["ok"] == json!(true) && vector["ok"] == json!(true);
    print_json(&json!({
        "ok": healthy,
        "queue": queue,
        "vector": vector,
        "store": store_report(settings),
    }))?;
    if !healthy {
        anyhow::bail!("One or more services are unhealthy");
    }
    Ok(())
}

/// Record counts and on-disk size of the run store.
///
/// Opened read-only so it works next to a running worker. A store that
/// cannot be opened is reported, not raised.
fn store_report(settings: &Settings) -> Value {
    let stats = open_storage_read_only(settings)
        .and_then(|storage| storage.get_stats().context("Failed to read store stats"));
    match stats {
        Ok(stats) => json!({
            "ok": true,
            "runs": stats.run_count,
            "indexes": stats.index_count,
            "artifacts": stats.artifact_count,
            "log_lines": stats.log_line_count,
            "disk_usage_bytes": stats.disk_usage_bytes,
        }),
        Err(e) => json!({ "ok": false, "error": format!("{:#}", e) }),
    }
}

fn run_report(storage: &Storage, run_id: &str) -> Result<Value> {
    let logs = storage.get_logs(run_id).context("Failed to read run log")?;
    let report = match storage.get_run(run_id).context("Failed to read run")? {
        Some(run) => {
            let mut value = serde_json::to_value(&run)?;
            value["logs"] = json!(logs);
            value
        }
        None => json!({
            "run_id": run_id,
            "status": RunStatus::Unknown,
            "logs": logs,
        }),
    };
    Ok(report)
}

fn enqueued_json(run: &Run, topic: &str) -> Value {
    json!({
        "enqueued": true,
        "topic": topic,
        "run_id": run.run_id,
        "index": run.index,
        "dataset": run.dataset,
        "version": run.version,
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
