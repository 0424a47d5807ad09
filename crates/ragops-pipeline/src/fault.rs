//! Deterministic fault injection.

use std::sync::Arc;

use ragops_storage::{Storage, StorageError};
use ragops_types::{FailMode, FailStep, StepName};
use tracing::debug;

/// Decides whether a step attempt should fail on purpose.
///
/// `once` is tracked by a marker stored per `(run_id, step)`, so it fails
/// exactly one attempt of that step for that run.
#[derive(Clone)]
pub struct FaultInjector {
    storage: Arc<Storage>,
}

impl FaultInjector {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn should_fail(
        &self,
        run_id: &str,
        fail_step: FailStep,
        fail_mode: FailMode,
        step: StepName,
    ) -> Result<bool, StorageError> {
        if !fail_step.targets(step) {
            return Ok(false);
        }
        let fail = match fail_mode {
            FailMode::Never => false,
            FailMode::Always => true,
            FailMode::Once => self.storage.put_marker(run_id, step)?,
        };
        debug!(run_id = %run_id, step = %step, mode = %fail_mode, fail, "Evaluated fault injection");
        Ok(fail)
    }
}
