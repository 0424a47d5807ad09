//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - runs: one mutable record per build run
//! - indexes: one mutable version history per index
//! - artifacts: step outputs, written once per (run, step)
//! - markers: fault-injection markers keyed by (run, step)
//! - run_logs: append-only human-readable run log lines

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for run records
pub const CF_RUNS: &str = "runs";

/// Column family name for index version histories
pub const CF_INDEXES: &str = "indexes";

/// Column family name for step artifacts
pub const CF_ARTIFACTS: &str = "artifacts";

/// Column family name for fault-injection markers
pub const CF_MARKERS: &str = "markers";

/// Column family name for run log lines
pub const CF_RUN_LOGS: &str = "run_logs";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_RUNS, CF_INDEXES, CF_ARTIFACTS, CF_MARKERS, CF_RUN_LOGS];

/// Artifacts hold chunk and embedding payloads; compress them
fn artifacts_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Run logs are append-only
fn run_logs_options() -> Options {
    let mut opts = Options::default();
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RUNS, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEXES, Options::default()),
        ColumnFamilyDescriptor::new(CF_ARTIFACTS, artifacts_options()),
        ColumnFamilyDescriptor::new(CF_MARKERS, Options::default()),
        ColumnFamilyDescriptor::new(CF_RUN_LOGS, run_logs_options()),
    ]
}
