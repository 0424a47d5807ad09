//! Run state storage for ragops.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for runs, index histories, artifacts,
//!   fault markers and run logs
//! - Read-modify-write of run and history records serialized per key
//! - Time-prefixed run log keys for ordered scans

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{ArtifactKey, HistoryKey, LogKey, MarkerKey, RunKey};
