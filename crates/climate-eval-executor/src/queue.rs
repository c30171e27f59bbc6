// crates/climate-eval-executor/src/queue.rs
// ============================================================================
// Module: Queue Executor
// Description: Broker-backed executor for distributed worker pools.
// Purpose: Route run requests through topic queues keyed by diagnostic.
// Dependencies: climate-eval-core, serde, serde_json, crate::runner
// ============================================================================

//! ## Overview
//! The queue executor publishes run requests to a [`MessageQueue`] keyed by
//! `(provider, diagnostic)`; workers consume their topics, drive the shared
//! runner, and report completions on a result topic. The broker trait is the
//! seam for external message systems; the in-memory implementation serves
//! single-process deployments and the test suite. Delivery-level (transient)
//! failures are redelivered up to a bound; application failures are recorded
//! on the execution row and never redeliver.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
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
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::runner::CancellationToken;
use crate::runner::ExecutionRunner;
use crate::runner::RunOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Topic carrying run completions back to the orchestrator.
pub const RESULT_TOPIC: &str = "results";
/// Default bound on transient redeliveries per request.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 3;

// ============================================================================
// SECTION: Broker Contract
// ============================================================================

/// Broker errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker rejected or lost the message.
    #[error("queue delivery failure: {0}")]
    Delivery(String),
    /// The broker connection is gone.
    #[error("queue disconnected: {0}")]
    Disconnected(String),
}

/// Minimal message broker surface used by the queue executor.
pub trait MessageQueue: Send + Sync {
    /// Publishes one message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the message cannot be enqueued.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Consumes one message from a topic, blocking up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on broker failure; `Ok(None)` on timeout.
    fn consume(&self, topic: &str, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError>;
}

// ============================================================================
// SECTION: In-Memory Broker
// ============================================================================

/// Process-local broker for single-host deployments and tests.
#[derive(Default)]
pub struct InMemoryBroker {
    /// Topic queues behind one lock.
    topics: Mutex<BTreeMap<String, VecDeque<Vec<u8>>>>,
    /// Signalled on every publish.
    published: Condvar,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for InMemoryBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), QueueError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| QueueError::Disconnected("broker mutex poisoned".to_string()))?;
        topics.entry(topic.to_string()).or_default().push_back(payload.to_vec());
        self.published.notify_all();
        Ok(())
    }

    fn consume(&self, topic: &str, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| QueueError::Disconnected("broker mutex poisoned".to_string()))?;
        loop {
            if let Some(queue) = topics.get_mut(topic)
                && let Some(payload) = queue.pop_front()
            {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (next, _) = self
                .published
                .wait_timeout(topics, deadline - now)
                .map_err(|_| QueueError::Disconnected("broker mutex poisoned".to_string()))?;
            topics = next;
        }
    }
}

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Run request carried on a diagnostic topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Execution to run.
    pub execution_id: ExecutionId,
    /// Delivery attempt, starting at zero.
    pub attempt: u32,
}

/// Run completion carried on the result topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompletion {
    /// Execution that terminated.
    pub execution_id: ExecutionId,
    /// Terminal status label.
    pub status: String,
}

/// Returns the topic name for one diagnostic.
#[must_use]
pub fn run_topic(provider: &str, diagnostic: &str) -> String {
    format!("runs.{provider}.{diagnostic}")
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Queue consumer driving the shared runner.
pub struct QueueWorker {
    /// Broker handle.
    broker: Arc<dyn MessageQueue>,
    /// Shared per-execution runner.
    runner: Arc<ExecutionRunner>,
    /// Topics this worker consumes.
    topics: Vec<String>,
    /// Bound on transient redeliveries.
    max_redeliveries: u32,
}

impl QueueWorker {
    /// Creates a worker over the given topics.
    #[must_use]
    pub fn new(
        broker: Arc<dyn MessageQueue>,
        runner: Arc<ExecutionRunner>,
        topics: Vec<String>,
        max_redeliveries: u32,
    ) -> Self {
        Self {
            broker,
            runner,
            topics,
            max_redeliveries,
        }
    }

    /// Consumes and processes at most one request; returns whether one was
    /// handled.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the broker is unreachable.
    pub fn run_once(&self, poll_timeout: Duration) -> Result<bool, QueueError> {
        for topic in &self.topics {
            let Some(payload) = self.broker.consume(topic, poll_timeout)? else {
                continue;
            };
            let request: RunRequest = match serde_json::from_slice(&payload) {
                Ok(request) => request,
                Err(err) => {
                    warn!(topic, error = %err, "dropping malformed run request");
                    continue;
                }
            };
            self.process(topic, request)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drains every topic until all are empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the broker is unreachable.
    pub fn run_until_idle(&self, poll_timeout: Duration) -> Result<u64, QueueError> {
        let mut handled = 0;
        while self.run_once(poll_timeout)? {
            handled += 1;
        }
        Ok(handled)
    }

    /// Processes one request: run, report, or redeliver on transient
    /// failure.
    fn process(&self, topic: &str, request: RunRequest) -> Result<(), QueueError> {
        match self.runner.run(request.execution_id, &CancellationToken::new()) {
            Ok(outcome) => {
                let status = match outcome {
                    RunOutcome::Succeeded => "succeeded",
                    RunOutcome::Failed => "failed",
                    RunOutcome::Cancelled => "cancelled",
                    RunOutcome::AlreadyClaimed => "already-claimed",
                };
                let completion = RunCompletion {
                    execution_id: request.execution_id,
                    status: status.to_string(),
                };
                let payload = serde_json::to_vec(&completion)
                    .map_err(|err| QueueError::Delivery(err.to_string()))?;
                self.broker.publish(RESULT_TOPIC, &payload)?;
                Ok(())
            }
            Err(err) => {
                // Transient infrastructure failure: redeliver up to the
                // bound, then report a terminal delivery failure.
                if request.attempt < self.max_redeliveries {
                    warn!(
                        execution = %request.execution_id,
                        attempt = request.attempt,
                        error = %err,
                        "transient failure; redelivering run request"
                    );
                    let retried = RunRequest {
                        execution_id: request.execution_id,
                        attempt: request.attempt + 1,
                    };
                    let payload = serde_json::to_vec(&retried)
                        .map_err(|err| QueueError::Delivery(err.to_string()))?;
                    self.broker.publish(topic, &payload)?;
                    return Ok(());
                }
                let completion = RunCompletion {
                    execution_id: request.execution_id,
                    status: "delivery-failed".to_string(),
                };
                let payload = serde_json::to_vec(&completion)
                    .map_err(|err| QueueError::Delivery(err.to_string()))?;
                self.broker.publish(RESULT_TOPIC, &payload)?;
                Ok(())
            }
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Executor publishing run requests to a broker.
pub struct QueueExecutor {
    /// Broker handle shared with the workers.
    broker: Arc<dyn MessageQueue>,
    /// Store for topic resolution and pending-row cancellation.
    runner: Arc<ExecutionRunner>,
    /// Executions submitted and not yet completed.
    outstanding: Mutex<BTreeSet<ExecutionId>>,
    /// Accumulated summary since the last join.
    summary: Mutex<ExecutorSummary>,
}

impl QueueExecutor {
    /// Creates a queue executor over the given broker.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageQueue>, runner: Arc<ExecutionRunner>) -> Self {
        Self {
            broker,
            runner,
            outstanding: Mutex::new(BTreeSet::new()),
            summary: Mutex::new(ExecutorSummary::default()),
        }
    }

    /// Locks a mutex, converting poisoning into an executor error.
    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>, ExecutorError> {
        mutex
            .lock()
            .map_err(|_| ExecutorError::Infrastructure("queue mutex poisoned".to_string()))
    }
}

impl Executor for QueueExecutor {
    fn submit(&self, execution_id: ExecutionId) -> Result<Submission, ExecutorError> {
        let execution = self.runner.store().execution(execution_id)?;
        let group = self.runner.store().group(execution.group_id)?;
        let topic = run_topic(group.provider_slug.as_str(), group.diagnostic_slug.as_str());
        let request = RunRequest {
            execution_id,
            attempt: 0,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|err| ExecutorError::Infrastructure(err.to_string()))?;
        self.broker
            .publish(&topic, &payload)
            .map_err(|err| ExecutorError::Infrastructure(err.to_string()))?;
        debug!(execution = %execution_id, topic, "published run request");
        Self::lock(&self.outstanding)?.insert(execution_id);
        Self::lock(&self.summary)?.submitted += 1;
        Ok(Submission {
            execution_id,
        })
    }

    fn join(&self, timeout: Option<Duration>) -> Result<ExecutorSummary, ExecutorError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if Self::lock(&self.outstanding)?.is_empty() {
                let mut summary = Self::lock(&self.summary)?;
                let mut result = *summary;
                *summary = ExecutorSummary::default();
                result.timed_out = false;
                return Ok(result);
            }
            let poll = match deadline {
                None => Duration::from_millis(200),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let mut summary = Self::lock(&self.summary)?;
                        let mut result = *summary;
                        *summary = ExecutorSummary::default();
                        result.timed_out = true;
                        return Ok(result);
                    }
                    (deadline - now).min(Duration::from_millis(200))
                }
            };
            let payload = self
                .broker
                .consume(RESULT_TOPIC, poll)
                .map_err(|err| ExecutorError::Infrastructure(err.to_string()))?;
            let Some(payload) = payload else {
                continue;
            };
            let completion: RunCompletion = serde_json::from_slice(&payload)
                .map_err(|err| ExecutorError::Infrastructure(err.to_string()))?;
            Self::lock(&self.outstanding)?.remove(&completion.execution_id);
            let mut summary = Self::lock(&self.summary)?;
            match completion.status.as_str() {
                "succeeded" => summary.succeeded += 1,
                "cancelled" => summary.cancelled += 1,
                "already-claimed" => {}
                _ => summary.failed += 1,
            }
        }
    }

    fn cancel(&self, execution_id: ExecutionId) -> Result<(), ExecutorError> {
        match self.runner.store().transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Cancelled,
            Timestamp::now(),
            None,
        ) {
            Ok(()) => {
                Self::lock(&self.summary)?.cancelled += 1;
                Ok(())
            }
            Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(ExecutorError::Store(err)),
        }
    }
}
