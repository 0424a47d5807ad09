//! # ragops-types
//!
//! Shared domain types for the ragops index-build orchestrator.
//!
//! - Runs: one record per build run, with per-step status and artifacts
//! - Index histories: recorded versions and the active version per index
//! - Messages: the build and rollback payloads carried over the queue
//! - Documents: discovered documents, chunks and embedded chunks
//! - Settings: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod history;
pub mod message;
pub mod run;

pub use config::Settings;
pub use document::{Chunk, Document, EmbeddedChunk};
pub use error::TypesError;
pub use history::IndexHistory;
pub use message::{
    BuildMessage, ControlMessage, FailMode, FailStep, MessageError, RollbackMessage,
    DEFAULT_DATASET, DEFAULT_INDEX,
};
pub use run::{Run, RunStatus, StepError, StepName, StepState, StepStatus};
