//! RocksDB wrapper for ragops run state.
//!
//! Provides:
//! - Database open with column family setup
//! - Run and index-history records with per-key read-modify-write
//! - Step artifacts and fault-injection markers
//! - Append-only run logs

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use rocksdb::{Direction, IteratorMode, Options, DB};
use tracing::{debug, info, warn};
use ulid::Generator;

use ragops_types::{IndexHistory, Run, StepName};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ARTIFACTS, CF_INDEXES, CF_MARKERS, CF_RUNS, CF_RUN_LOGS,
};
use crate::error::StorageError;
use crate::keys::{ArtifactKey, HistoryKey, LogKey, MarkerKey, RunKey};

/// Main storage interface for ragops
///
/// Safe to share between tasks behind an `Arc`. Mutations of a single run or
/// index history are serialized through an in-process lock per record key.
pub struct Storage {
    db: DB,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Monotonic ULIDs keep log lines appended in the same millisecond ordered
    log_ids: Mutex<Generator>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        Ok(Self {
            db,
            locks: DashMap::new(),
            log_ids: Mutex::new(Generator::new()),
        })
    }

    /// Open an existing store read-only.
    ///
    /// Readers can use this while a worker holds the store open for
    /// writing. Writes through a read-only store fail.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage read-only at {:?}", path);

        let db = DB::open_cf_for_read_only(&Options::default(), path, ALL_CF_NAMES.iter(), false)?;

        Ok(Self {
            db,
            locks: DashMap::new(),
            log_ids: Mutex::new(Generator::new()),
        })
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::MissingColumnFamily(name.to_string()))
    }

    // ===== Runs =====

    /// Get a run by id
    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>, StorageError> {
        let cf = self.cf(CF_RUNS)?;
        match self.db.get_cf(cf, RunKey::new(run_id).to_bytes())? {
            Some(bytes) => Ok(Some(Run::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a run record
    pub fn put_run(&self, run: &Run) -> Result<(), StorageError> {
        let cf = self.cf(CF_RUNS)?;
        self.db
            .put_cf(cf, RunKey::new(&run.run_id).to_bytes(), run.to_bytes()?)?;
        debug!(run_id = %run.run_id, status = %run.status, "Stored run");
        Ok(())
    }

    /// Store a new run. Fails with `AlreadyExists` if the id is taken.
    pub fn create_run(&self, run: &Run) -> Result<(), StorageError> {
        let key = RunKey::new(&run.run_id);
        let lock = self.key_lock(&String::from_utf8_lossy(&key.to_bytes()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.get_run(&run.run_id)?.is_some() {
            return Err(StorageError::RunExists(run.run_id.clone()));
        }
        self.put_run(run)
    }

    /// Return the stored run, or store and return the one built by `init`.
    ///
    /// The boolean is true when the run was created by this call.
    pub fn get_or_create_run<F>(&self, run_id: &str, init: F) -> Result<(Run, bool), StorageError>
    where
        F: FnOnce() -> Run,
    {
        let key = RunKey::new(run_id);
        let lock = self.key_lock(&String::from_utf8_lossy(&key.to_bytes()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(run) = self.get_run(run_id)? {
            return Ok((run, false));
        }
        let run = init();
        self.put_run(&run)?;
        Ok((run, true))
    }

    /// Read-modify-write a run under its key lock.
    ///
    /// Bumps `updated_at` and returns the stored result.
    pub fn update_run<F>(&self, run_id: &str, f: F) -> Result<Run, StorageError>
    where
        F: FnOnce(&mut Run),
    {
        let key = RunKey::new(run_id);
        let lock = self.key_lock(&String::from_utf8_lossy(&key.to_bytes()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut run = self
            .get_run(run_id)?
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))?;
        f(&mut run);
        run.updated_at = Utc::now();
        self.put_run(&run)?;
        Ok(run)
    }

    // ===== Index histories =====

    /// Get an index history; an unknown index reads as empty.
    pub fn get_history(&self, index: &str) -> Result<IndexHistory, StorageError> {
        let cf = self.cf(CF_INDEXES)?;
        match self.db.get_cf(cf, HistoryKey::new(index).to_bytes())? {
            Some(bytes) => Ok(IndexHistory::from_bytes(&bytes)?),
            None => Ok(IndexHistory::empty(index)),
        }
    }

    fn put_history(&self, history: &IndexHistory) -> Result<(), StorageError> {
        let cf = self.cf(CF_INDEXES)?;
        self.db.put_cf(
            cf,
            HistoryKey::new(&history.index).to_bytes(),
            history.to_bytes()?,
        )?;
        Ok(())
    }

    /// Read-modify-write an index history under its key lock.
    ///
    /// Returns whatever `f` returns, after the modified history is stored.
    pub fn update_history<F, T>(&self, index: &str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut IndexHistory) -> T,
    {
        let key = HistoryKey::new(index);
        let lock = self.key_lock(&String::from_utf8_lossy(&key.to_bytes()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut history = self.get_history(index)?;
        let out = f(&mut history);
        self.put_history(&history)?;
        debug!(index = %index, active = ?history.active, versions = history.versions.len(), "Stored index history");
        Ok(out)
    }

    // ===== Artifacts =====

    /// Store a step artifact and return its reference.
    pub fn put_artifact(
        &self,
        run_id: &str,
        step: StepName,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let cf = self.cf(CF_ARTIFACTS)?;
        let key = ArtifactKey::new(run_id, step);
        self.db.put_cf(cf, key.to_bytes(), bytes)?;
        debug!(run_id = %run_id, step = %step, bytes = bytes.len(), "Stored artifact");
        Ok(key.reference())
    }

    pub fn get_artifact(
        &self,
        run_id: &str,
        step: StepName,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_ARTIFACTS)?;
        Ok(self
            .db
            .get_cf(cf, ArtifactKey::new(run_id, step).to_bytes())?)
    }

    pub fn has_artifact(&self, run_id: &str, step: StepName) -> Result<bool, StorageError> {
        Ok(self.get_artifact(run_id, step)?.is_some())
    }

    // ===== Fault markers =====

    /// Set the marker for (run, step). Returns true if it was not already set.
    pub fn put_marker(&self, run_id: &str, step: StepName) -> Result<bool, StorageError> {
        let cf = self.cf(CF_MARKERS)?;
        let key = MarkerKey::new(run_id, step);
        let lock = self.key_lock(&String::from_utf8_lossy(&key.to_bytes()));
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.db.get_cf(cf, key.to_bytes())?.is_some() {
            return Ok(false);
        }
        let now = Utc::now().to_rfc3339();
        self.db.put_cf(cf, key.to_bytes(), now.as_bytes())?;
        Ok(true)
    }

    // ===== Run logs =====

    /// Append a line to a run's log
    pub fn append_log(&self, run_id: &str, line: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_RUN_LOGS)?;
        let ulid = self
            .log_ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generate()
            .map_err(|e| StorageError::Key(format!("Log id overflow: {}", e)))?;
        let key = LogKey::from_ulid(run_id, ulid);
        self.db.put_cf(cf, key.to_bytes(), line.as_bytes())?;
        Ok(())
    }

    /// All log lines of a run, oldest first
    pub fn get_logs(&self, run_id: &str) -> Result<Vec<String>, StorageError> {
        let cf = self.cf(CF_RUN_LOGS)?;
        let prefix = LogKey::prefix(run_id);

        let mut lines = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // A run id containing ':' can share a prefix with another run
            match LogKey::from_bytes(&key) {
                Ok(decoded) if decoded.run_id == run_id => {
                    lines.push(String::from_utf8_lossy(&value).to_string());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping malformed run log key"),
            }
        }

        Ok(lines)
    }

    // ===== Admin Operations =====

    /// Flush all memtables to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        for cf_name in &[CF_RUNS, CF_INDEXES, CF_ARTIFACTS, CF_MARKERS, CF_RUN_LOGS] {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            run_count: self.count_cf_entries(self.cf(CF_RUNS)?)?,
            index_count: self.count_cf_entries(self.cf(CF_INDEXES)?)?,
            artifact_count: self.count_cf_entries(self.cf(CF_ARTIFACTS)?)?,
            log_line_count: self.count_cf_entries(self.cf(CF_RUN_LOGS)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of runs
    pub run_count: u64,
    /// Number of indexes with a history
    pub index_count: u64,
    /// Number of stored step artifacts
    pub artifact_count: u64,
    /// Number of run log lines
    pub log_line_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
