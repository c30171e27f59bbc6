// crates/climate-eval-executor/src/pool.rs
// ============================================================================
// Module: Local Pool Executor
// Description: Bounded worker pool over OS threads and a work queue.
// Purpose: Parallel local execution with non-blocking submission.
// Dependencies: climate-eval-core, crate::runner
// ============================================================================

//! ## Overview
//! The local pool executor fans submissions out to a bounded set of OS
//! threads fed by a synchronous channel. Submissions return immediately;
//! `join` blocks until every accepted execution reaches a terminal state or
//! the timeout elapses. Workers share no memory with the orchestrator beyond
//! the store handle; ordering across groups is unspecified, and within a
//! group the store's one-running invariant serializes attempts. Cancellation
//! is cooperative: pending rows are cancelled in the store, running ones get
//! their token flagged and are cancelled at the next checkpoint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::mpsc;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use climate_eval_core::ExecutionId;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::Executor;
use climate_eval_core::ExecutorError;
use climate_eval_core::ExecutorSummary;
use climate_eval_core::StoreError;
use climate_eval_core::Submission;
use climate_eval_core::Timestamp;
use tracing::debug;

use crate::runner::CancellationToken;
use crate::runner::ExecutionRunner;
use crate::runner::RunOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Work queue capacity per worker.
const QUEUE_CAPACITY_PER_WORKER: usize = 64;

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// Counters shared between submitters, workers, and join.
#[derive(Debug, Default)]
struct PoolState {
    /// Executions accepted and not yet terminal.
    in_flight: u64,
    /// Accumulated summary since the last join.
    summary: ExecutorSummary,
    /// Cancellation tokens of claimed executions.
    tokens: BTreeMap<ExecutionId, CancellationToken>,
}

/// Shared pool coordination handle.
#[derive(Default)]
struct PoolShared {
    /// Mutable counters behind one lock.
    state: Mutex<PoolState>,
    /// Signalled whenever an execution terminates.
    drained: Condvar,
}

impl PoolShared {
    /// Locks the state, converting poisoning into an executor error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolState>, ExecutorError> {
        self.state
            .lock()
            .map_err(|_| ExecutorError::Infrastructure("pool mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Bounded worker-pool executor over OS threads.
///
/// # Invariants
/// - Worker threads live as long as the executor value.
/// - `join` returns only when `in_flight` reaches zero or the timeout
///   elapses.
pub struct LocalPoolExecutor {
    /// Shared per-execution runner (also used for cancellation of pending
    /// rows).
    runner: Arc<ExecutionRunner>,
    /// Work queue feeding the workers.
    sender: SyncSender<ExecutionId>,
    /// Shared counters and tokens.
    shared: Arc<PoolShared>,
    /// Worker join handles, kept for drop-time shutdown.
    workers: Vec<thread::JoinHandle<()>>,
}

impl LocalPoolExecutor {
    /// Creates a pool with the given worker count; `None` uses the
    /// machine's available parallelism.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Infrastructure`] when worker threads cannot
    /// be spawned.
    pub fn new(runner: ExecutionRunner, workers: Option<usize>) -> Result<Self, ExecutorError> {
        let worker_count = workers
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |count| count.get()))
            .max(1);
        let runner = Arc::new(runner);
        let shared = Arc::new(PoolShared::default());
        let (sender, receiver) = mpsc::sync_channel(worker_count * QUEUE_CAPACITY_PER_WORKER);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let runner = Arc::clone(&runner);
            let shared = Arc::clone(&shared);
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("eval-worker-{index}"))
                .spawn(move || worker_loop(&runner, &shared, &receiver))
                .map_err(|err| ExecutorError::Infrastructure(err.to_string()))?;
            handles.push(handle);
        }
        Ok(Self {
            runner,
            sender,
            shared,
            workers: handles,
        })
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Worker loop: pull, register a token, run, settle counters.
fn worker_loop(
    runner: &ExecutionRunner,
    shared: &PoolShared,
    receiver: &Mutex<mpsc::Receiver<ExecutionId>>,
) {
    loop {
        let next = {
            let Ok(receiver) = receiver.lock() else {
                return;
            };
            receiver.recv()
        };
        let Ok(execution_id) = next else {
            return;
        };
        let token = CancellationToken::new();
        if let Ok(mut state) = shared.state.lock() {
            state.tokens.insert(execution_id, token.clone());
        }
        let outcome = runner.run(execution_id, &token);
        if let Ok(mut state) = shared.state.lock() {
            state.tokens.remove(&execution_id);
            state.in_flight = state.in_flight.saturating_sub(1);
            match outcome {
                Ok(RunOutcome::Succeeded) => state.summary.succeeded += 1,
                Ok(RunOutcome::Failed) | Err(_) => state.summary.failed += 1,
                Ok(RunOutcome::Cancelled) => state.summary.cancelled += 1,
                Ok(RunOutcome::AlreadyClaimed) => {}
            }
            shared.drained.notify_all();
        }
    }
}

impl Executor for LocalPoolExecutor {
    fn submit(&self, execution_id: ExecutionId) -> Result<Submission, ExecutorError> {
        {
            let mut state = self.shared.lock()?;
            state.in_flight += 1;
            state.summary.submitted += 1;
        }
        match self.sender.try_send(execution_id) {
            Ok(()) => {
                debug!(execution = %execution_id, "queued execution");
                Ok(Submission {
                    execution_id,
                })
            }
            Err(TrySendError::Full(_)) => {
                let mut state = self.shared.lock()?;
                state.in_flight = state.in_flight.saturating_sub(1);
                state.summary.submitted = state.summary.submitted.saturating_sub(1);
                Err(ExecutorError::Rejected("work queue is full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(ExecutorError::Infrastructure("worker pool is shut down".to_string()))
            }
        }
    }

    fn join(&self, timeout: Option<Duration>) -> Result<ExecutorSummary, ExecutorError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.lock()?;
        loop {
            if state.in_flight == 0 {
                let mut result = state.summary;
                state.summary = ExecutorSummary::default();
                result.timed_out = false;
                return Ok(result);
            }
            match deadline {
                None => {
                    state = self
                        .shared
                        .drained
                        .wait(state)
                        .map_err(|_| {
                            ExecutorError::Infrastructure("pool mutex poisoned".to_string())
                        })?;
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let mut result = state.summary;
                        state.summary = ExecutorSummary::default();
                        result.timed_out = true;
                        return Ok(result);
                    }
                    let (next, _) = self
                        .shared
                        .drained
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| {
                            ExecutorError::Infrastructure("pool mutex poisoned".to_string())
                        })?;
                    state = next;
                }
            }
        }
    }

    fn cancel(&self, execution_id: ExecutionId) -> Result<(), ExecutorError> {
        // Pending rows cancel in the store; claimed ones get their token
        // flagged for the next checkpoint.
        match self.runner.store().transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Cancelled,
            Timestamp::now(),
            None,
        ) {
            Ok(()) => {
                // The queued item still reaches a worker, which observes the
                // lost claim and settles the in-flight counter.
                let mut state = self.shared.lock()?;
                state.summary.cancelled += 1;
                return Ok(());
            }
            Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => {}
            Err(err) => return Err(ExecutorError::Store(err)),
        }
        let state = self.shared.lock()?;
        if let Some(token) = state.tokens.get(&execution_id) {
            token.cancel();
        }
        Ok(())
    }
}

impl Drop for LocalPoolExecutor {
    fn drop(&mut self) {
        // Closing the channel ends the worker loops; joining bounds
        // shutdown.
        let (closed_sender, _) = mpsc::sync_channel(1);
        let sender = std::mem::replace(&mut self.sender, closed_sender);
        drop(sender);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
