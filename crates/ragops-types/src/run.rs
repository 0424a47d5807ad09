//! Build run records.
//!
//! A run is created when a build is enqueued (status `QUEUED`), or lazily
//! by the worker if the enqueue side never persisted it. It is mutated step
//! by step by the executor and never deleted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::message::{FailMode, FailStep};

/// Overall status of a run.
///
/// `Unknown` is only ever produced for ids with no stored record; it is
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl RunStatus {
    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stages in execution order.
///
/// The derived `Ord` follows declaration order, which is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Discover,
    Chunk,
    Embed,
    Upsert,
    Promote,
    Smoketest,
}

impl StepName {
    /// All steps in pipeline order.
    pub const ORDER: [StepName; 6] = [
        StepName::Discover,
        StepName::Chunk,
        StepName::Embed,
        StepName::Upsert,
        StepName::Promote,
        StepName::Smoketest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Discover => "discover",
            StepName::Chunk => "chunk",
            StepName::Embed => "embed",
            StepName::Upsert => "upsert",
            StepName::Promote => "promote",
            StepName::Smoketest => "smoketest",
        }
    }

    /// Steps whose output is a stored artifact that later attempts may reuse.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, StepName::Discover | StepName::Chunk | StepName::Embed)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::ORDER
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| TypesError::UnknownStep(s.to_string()))
    }
}

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Per-step status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub status: StepState,
}

impl StepStatus {
    pub fn new(status: StepState) -> Self {
        Self { status }
    }

    pub fn pending() -> Self {
        Self::new(StepState::Pending)
    }
}

/// An error recorded against a run.
///
/// `step` is a step name for pipeline failures, or a phase such as
/// `"enqueue"` for failures outside the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step: String,
    pub error: String,
}

impl StepError {
    pub fn new(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            error: error.into(),
        }
    }
}

/// Durable record of one build run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub index: String,
    pub dataset: String,
    pub version: u32,
    pub fail_step: FailStep,
    pub fail_mode: FailMode,
    pub status: RunStatus,
    pub steps: BTreeMap<StepName, StepStatus>,
    /// Artifact reference per completed step
    pub artifacts: BTreeMap<StepName, String>,
    pub errors: Vec<StepError>,
    /// Number of logical attempts started by the executor
    #[serde(default)]
    pub attempt: u32,
    /// Idempotency key of the latest replay attempt started on this run
    #[serde(default)]
    pub last_replay_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a fresh `QUEUED` run with every step `PENDING`.
    pub fn queued(
        run_id: impl Into<String>,
        index: impl Into<String>,
        dataset: impl Into<String>,
        version: u32,
        fail_step: FailStep,
        fail_mode: FailMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            index: index.into(),
            dataset: dataset.into(),
            version,
            fail_step,
            fail_mode,
            status: RunStatus::Queued,
            steps: StepName::ORDER
                .iter()
                .map(|step| (*step, StepStatus::pending()))
                .collect(),
            artifacts: BTreeMap::new(),
            errors: Vec::new(),
            attempt: 0,
            last_replay_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the state of a step (missing entries read as `PENDING`).
    pub fn step_state(&self, step: StepName) -> StepState {
        self.steps
            .get(&step)
            .map(|s| s.status)
            .unwrap_or(StepState::Pending)
    }

    pub fn set_step(&mut self, step: StepName, state: StepState) {
        self.steps.insert(step, StepStatus::new(state));
    }

    /// Record a failure of `step` and mark the whole run `FAILED`.
    pub fn fail(&mut self, step: impl Into<String>, error: impl Into<String>) {
        self.errors.push(StepError::new(step, error));
        self.status = RunStatus::Failed;
    }

    /// True when every step from `start` onward has succeeded.
    pub fn steps_succeeded_from(&self, start: StepName) -> bool {
        StepName::ORDER
            .iter()
            .filter(|step| **step >= start)
            .all(|step| self.step_state(*step) == StepState::Succeeded)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
