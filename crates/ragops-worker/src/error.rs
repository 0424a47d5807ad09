//! Error types for the worker crate.

use ragops_pipeline::PipelineError;
use ragops_queue::QueueError;
use ragops_storage::StorageError;
use ragops_types::MessageError;
use thiserror::Error;

/// Errors raised by handlers, the consumer loop and the enqueuer.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payload decoded to JSON but not to a known message
    #[error("Invalid message: {0}")]
    Message(#[from] MessageError),

    /// Delivery carried no usable JSON payload
    #[error("payload missing or not a JSON object")]
    MalformedPayload,

    /// A message kind arrived on the wrong topic
    #[error("expected a {expected} message, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    /// Producing a run's message failed; the failure is recorded on the run
    #[error("enqueue failed for run {run_id}: {source}")]
    EnqueueFailed {
        run_id: String,
        #[source]
        source: Box<WorkerError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// The consumer loop hit its consecutive-failure ceiling
    #[error("giving up on topic {topic} after {failures} consecutive failures: {last_error}")]
    TooManyFailures {
        topic: String,
        failures: u32,
        last_error: String,
    },

    #[error("Topics unavailable: {0}")]
    TopicsUnavailable(String),
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Serialization(err.to_string())
    }
}
