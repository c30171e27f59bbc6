// crates/climate-eval-executor/src/sync.rs
// ============================================================================
// Module: Synchronous Executor
// Description: Inline executor running each submission to completion.
// Purpose: Deterministic debugging backend with the full executor contract.
// Dependencies: climate-eval-core, crate::runner
// ============================================================================

//! ## Overview
//! The synchronous executor runs each submission to completion before
//! `submit` returns. It exists for debugging and for tests that need fully
//! deterministic execution order; the contract is otherwise identical to the
//! parallel variants, including the at-most-one-running invariant enforced by
//! the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use climate_eval_core::ExecutionId;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::Executor;
use climate_eval_core::ExecutorError;
use climate_eval_core::ExecutorSummary;
use climate_eval_core::StoreError;
use climate_eval_core::Submission;
use climate_eval_core::Timestamp;

use crate::runner::CancellationToken;
use crate::runner::ExecutionRunner;
use crate::runner::RunOutcome;

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Executor that runs submissions inline on the calling thread.
pub struct SynchronousExecutor {
    /// Shared per-execution runner.
    runner: ExecutionRunner,
    /// Accumulated summary since the last join.
    summary: Mutex<ExecutorSummary>,
}

impl SynchronousExecutor {
    /// Creates a synchronous executor over the given runner.
    #[must_use]
    pub fn new(runner: ExecutionRunner) -> Self {
        Self {
            runner,
            summary: Mutex::new(ExecutorSummary::default()),
        }
    }

    /// Locks the summary, converting poisoning into an executor error.
    fn summary_lock(&self) -> Result<std::sync::MutexGuard<'_, ExecutorSummary>, ExecutorError> {
        self.summary
            .lock()
            .map_err(|_| ExecutorError::Infrastructure("summary mutex poisoned".to_string()))
    }
}

impl Executor for SynchronousExecutor {
    fn submit(&self, execution_id: ExecutionId) -> Result<Submission, ExecutorError> {
        let outcome = self.runner.run(execution_id, &CancellationToken::new())?;
        let mut summary = self.summary_lock()?;
        summary.submitted += 1;
        match outcome {
            RunOutcome::Succeeded => summary.succeeded += 1,
            RunOutcome::Failed => summary.failed += 1,
            RunOutcome::Cancelled => summary.cancelled += 1,
            RunOutcome::AlreadyClaimed => {}
        }
        Ok(Submission {
            execution_id,
        })
    }

    fn join(&self, _timeout: Option<Duration>) -> Result<ExecutorSummary, ExecutorError> {
        let mut summary = self.summary_lock()?;
        let result = *summary;
        *summary = ExecutorSummary::default();
        Ok(result)
    }

    fn cancel(&self, execution_id: ExecutionId) -> Result<(), ExecutorError> {
        // Nothing is in flight between calls; only pending rows can cancel.
        match self.runner.store().transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Cancelled,
            Timestamp::now(),
            None,
        ) {
            Ok(()) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(err) => Err(ExecutorError::Store(err)),
        }
    }
}
