//! # ragops-pipeline
//!
//! Executes index builds and manages index versions.
//!
//! A build runs the fixed step sequence
//! `discover -> chunk -> embed -> upsert -> promote -> smoketest`, persisting
//! each step's status and artifact so that a redelivered or replayed build
//! resumes instead of starting over. Promotion and rollback move an index's
//! public alias between versioned collections.

pub mod error;
pub mod executor;
pub mod fault;
pub mod naming;
pub mod source;
pub mod steps;
pub mod versions;

pub use error::PipelineError;
pub use executor::{BuildOutcome, ExecutorConfig, StepExecutor};
pub use fault::FaultInjector;
pub use naming::IndexNaming;
pub use source::{DirectorySource, DocumentSource, StaticSource};
pub use steps::{SmoketestResult, SMOKETEST_QUERIES};
pub use versions::{AliasManager, AliasOutcome, IndexStatus};
