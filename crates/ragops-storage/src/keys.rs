//! Key encoding and decoding for storage layer.
//!
//! Record keys are `{prefix}:{id}`. Run log keys are
//! `log:{run_id}:{timestamp_ms:013}:{ulid}` so a prefix scan returns a run's
//! log lines in time order.

use ragops_types::StepName;
use ulid::Ulid;

use crate::error::StorageError;

/// Key for run records
/// Format: run:{run_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunKey {
    pub run_id: String,
}

impl RunKey {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("run:{}", self.run_id).into_bytes()
    }
}

/// Key for index histories
/// Format: index:{index}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKey {
    pub index: String,
}

impl HistoryKey {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("index:{}", self.index).into_bytes()
    }
}

/// Key for step artifacts
/// Format: artifact:{run_id}:{step}
///
/// The string form doubles as the artifact reference stored in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub run_id: String,
    pub step: StepName,
}

impl ArtifactKey {
    pub fn new(run_id: impl Into<String>, step: StepName) -> Self {
        Self {
            run_id: run_id.into(),
            step,
        }
    }

    pub fn reference(&self) -> String {
        format!("artifact:{}:{}", self.run_id, self.step)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.reference().into_bytes()
    }
}

/// Key for fault-injection markers
/// Format: marker:{run_id}:{step}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerKey {
    pub run_id: String,
    pub step: StepName,
}

impl MarkerKey {
    pub fn new(run_id: impl Into<String>, step: StepName) -> Self {
        Self {
            run_id: run_id.into(),
            step,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("marker:{}:{}", self.run_id, self.step).into_bytes()
    }
}

/// Key for run log lines
/// Format: log:{run_id}:{timestamp_ms:013}:{ulid}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogKey {
    pub run_id: String,
    pub timestamp_ms: i64,
    pub ulid: Ulid,
}

impl LogKey {
    /// Create a new log key with given timestamp and fresh ULID
    pub fn new(run_id: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp_ms,
            ulid: Ulid::new(),
        }
    }

    /// Create a log key from a ULID, taking the timestamp from it
    pub fn from_ulid(run_id: impl Into<String>, ulid: Ulid) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp_ms: ulid.timestamp_ms() as i64,
            ulid,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Zero-pad timestamp to 13 digits for lexicographic sorting
        format!("log:{}:{:013}:{}", self.run_id, self.timestamp_ms, self.ulid).into_bytes()
    }

    /// Scan prefix covering every log line of a run
    pub fn prefix(run_id: &str) -> Vec<u8> {
        format!("log:{}:", run_id).into_bytes()
    }

    /// Decode key from bytes. The run id may itself contain ':'.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let mut parts = s.rsplitn(3, ':');
        let (Some(ulid), Some(ts), Some(head)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(StorageError::Key(format!("Invalid log key format: {}", s)));
        };
        let run_id = head
            .strip_prefix("log:")
            .ok_or_else(|| StorageError::Key(format!("Invalid log key format: {}", s)))?;

        let timestamp_ms: i64 = ts
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        let ulid: Ulid = ulid
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid ULID: {}", e)))?;

        Ok(Self {
            run_id: run_id.to_string(),
            timestamp_ms,
            ulid,
        })
    }
}
