//! # ragops-worker
//!
//! Queue-facing side of the orchestrator.
//!
//! - [`ConsumerLoop`]: leases messages from one topic, hands each to a
//!   [`MessageHandler`] in order, acks on success and nacks on failure,
//!   reconnecting with capped exponential backoff on transport faults
//! - [`BuildHandler`] / [`ControlHandler`]: route build messages to the
//!   step executor and rollback messages to the alias manager
//! - [`Enqueuer`]: produces build, replay and rollback messages with stable
//!   idempotency keys and records enqueue failures on the run

pub mod consumer;
pub mod dispatch;
pub mod enqueue;
pub mod error;

pub use consumer::{ConsumerConfig, ConsumerLoop, LoopStats, MessageHandler};
pub use dispatch::{BuildHandler, ControlHandler};
pub use enqueue::{BuildRequest, Enqueuer};
pub use error::WorkerError;
