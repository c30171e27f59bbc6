// crates/climate-eval-executor/tests/executor_unit.rs
// ============================================================================
// Module: Executor Unit Tests
// Description: Lifecycle tests for the executor variants.
// Purpose: Validate claiming, recording, failure isolation, cancellation,
//          and queue redelivery against the reference store.
// ============================================================================

//! ## Overview
//! Drives the synchronous, pool, and queue executors with a small in-process
//! diagnostic over the in-memory reference store:
//! - success records outputs and metric values and cleans the group
//! - diagnostic failure is recorded on the row and never propagates
//! - invalid metric bundles fail the execution with nothing inserted
//! - queue workers redeliver on transient failure bounds

#![allow(
    clippy::missing_docs_in_private_items,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use climate_eval_core::DataRequirement;
use climate_eval_core::Diagnostic;
use climate_eval_core::DiagnosticError;
use climate_eval_core::DiagnosticLookup;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::DiagnosticSummary;
use climate_eval_core::EvaluationStore;
use climate_eval_core::Execution;
use climate_eval_core::ExecutionDefinition;
use climate_eval_core::ExecutionResult;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::Executor;
use climate_eval_core::GroupKey;
use climate_eval_core::InMemoryEvaluationStore;
use climate_eval_core::MetricBundle;
use climate_eval_core::MetricDimensions;
use climate_eval_core::OutputBundle;
use climate_eval_core::OutputFileReference;
use climate_eval_core::ProviderSlug;
use climate_eval_core::Timestamp;
use climate_eval_executor::ExecutionRunner;
use climate_eval_executor::InMemoryBroker;
use climate_eval_executor::LocalPoolExecutor;
use climate_eval_executor::QueueExecutor;
use climate_eval_executor::QueueWorker;
use climate_eval_executor::RunnerConfig;
use climate_eval_executor::SynchronousExecutor;
use climate_eval_executor::recover_lost_workers;
use climate_eval_executor::run_topic;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Test Diagnostic
// ============================================================================

/// What the test diagnostic should do when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Write a plot and return valid bundles.
    Succeed,
    /// Return an execution error.
    FailExecution,
    /// Return a metric bundle with an object leaf.
    InvalidBundle,
}

/// Minimal in-process diagnostic used by the executor tests.
struct TestDiagnostic {
    /// Selected behavior.
    behavior: Behavior,
}

impl Diagnostic for TestDiagnostic {
    fn slug(&self) -> DiagnosticSlug {
        DiagnosticSlug::new("test-diagnostic")
    }

    fn data_requirements(&self) -> Vec<DataRequirement> {
        Vec::new()
    }

    fn facets(&self) -> BTreeSet<String> {
        ["region".to_string()].into_iter().collect()
    }

    fn execute(&self, definition: &ExecutionDefinition) -> Result<(), DiagnosticError> {
        if self.behavior == Behavior::FailExecution {
            return Err(DiagnosticError::Execution("synthetic failure".to_string()));
        }
        std::fs::write(definition.output_directory.join("bias.png"), b"png")
            .map_err(|err| DiagnosticError::Execution(err.to_string()))?;
        Ok(())
    }

    fn build_execution_result(
        &self,
        _definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, DiagnosticError> {
        let output_bundle = OutputBundle {
            plots: [("bias".to_string(), OutputFileReference::new("bias.png"))]
                .into_iter()
                .collect(),
            ..OutputBundle::default()
        };

        let results = if self.behavior == Behavior::InvalidBundle {
            json!({ "global": { "deep": 1.0 } })
        } else {
            json!({ "global": 0.75 })
        };
        let metric_bundle = MetricBundle {
            dimensions: MetricDimensions {
                json_structure: vec!["region".to_string()],
                entries: [(
                    "region".to_string(),
                    [("global".to_string(), json!({}))].into_iter().collect(),
                )]
                .into_iter()
                .collect(),
            },
            results,
        };
        Ok(ExecutionResult {
            output_bundle,
            metric_bundle,
        })
    }
}

/// Registry resolving every slug to one test diagnostic.
struct TestRegistry {
    /// Behavior handed to every resolved diagnostic.
    behavior: Behavior,
}

impl DiagnosticLookup for TestRegistry {
    fn diagnostic(
        &self,
        _provider: &ProviderSlug,
        _diagnostic: &DiagnosticSlug,
    ) -> Option<Arc<dyn Diagnostic>> {
        Some(Arc::new(TestDiagnostic {
            behavior: self.behavior,
        }))
    }

    fn summaries(&self) -> Vec<DiagnosticSummary> {
        Vec::new()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn now() -> Timestamp {
    Timestamp::from_unix_seconds(1_700_000_000)
}

fn pending_execution(store: &Arc<InMemoryEvaluationStore>) -> Execution {
    let group = store
        .ensure_group(
            &ProviderSlug::new("example"),
            &DiagnosticSlug::new("test-diagnostic"),
            &GroupKey::new([("source_id".to_string(), "ACCESS-ESM1-5".to_string())]),
            now(),
        )
        .unwrap();
    store.create_execution(group.id, "hash-1", &[], now()).unwrap()
}

fn runner(tmp: &TempDir, store: &Arc<InMemoryEvaluationStore>, behavior: Behavior) -> ExecutionRunner {
    ExecutionRunner::new(
        Arc::clone(store) as Arc<dyn EvaluationStore>,
        Arc::new(TestRegistry {
            behavior,
        }),
        RunnerConfig::new(tmp.path().join("scratch")),
    )
}

// ============================================================================
// SECTION: Synchronous Executor Tests
// ============================================================================

#[test]
fn successful_execution_records_outputs_and_metrics() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let executor = SynchronousExecutor::new(runner(&tmp, &store, Behavior::Succeed));

    executor.submit(execution.id).unwrap();
    let summary = executor.join(None).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(summary.is_clean());

    let reloaded = store.execution(execution.id).unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Succeeded);
    assert!(!store.group(reloaded.group_id).unwrap().dirty);

    let outputs = store.execution_outputs(execution.id).unwrap();
    let paths: Vec<String> = outputs
        .iter()
        .map(|output| output.entry.relative_path.display().to_string())
        .collect();
    assert!(paths.contains(&"output.json".to_string()));
    assert!(paths.contains(&"diagnostic.json".to_string()));
    assert!(paths.contains(&"bias.png".to_string()));

    let metrics = store.metric_values(execution.id).unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].facets["region"], "global");
}

#[test]
fn diagnostic_failure_is_recorded_not_propagated() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let executor = SynchronousExecutor::new(runner(&tmp, &store, Behavior::FailExecution));

    executor.submit(execution.id).unwrap();
    let summary = executor.join(None).unwrap();
    assert_eq!(summary.failed, 1);

    let reloaded = store.execution(execution.id).unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Failed);
    assert!(reloaded.failure_reason.unwrap().contains("synthetic failure"));
}

#[test]
fn invalid_metric_bundle_fails_with_no_values_inserted() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let executor = SynchronousExecutor::new(runner(&tmp, &store, Behavior::InvalidBundle));

    executor.submit(execution.id).unwrap();
    let reloaded = store.execution(execution.id).unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Failed);
    assert!(reloaded.failure_reason.unwrap().contains("invalid result bundle"));
    assert!(store.metric_values(execution.id).unwrap().is_empty());
}

#[test]
fn scratch_is_removed_on_success() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let executor = SynchronousExecutor::new(runner(&tmp, &store, Behavior::Succeed));
    executor.submit(execution.id).unwrap();
    assert!(!tmp.path().join("scratch").join(format!("exec-{}", execution.id)).exists());
}

#[test]
fn lost_workers_are_failed_on_startup_recovery() {
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    store
        .transition_execution(
            execution.id,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            now(),
            None,
        )
        .unwrap();
    store.record_heartbeat(execution.id, now()).unwrap();

    let later = Timestamp::from_unix_seconds(now().unix_seconds() + 3_600);
    let recovered =
        recover_lost_workers(store.as_ref(), Duration::from_secs(600), later).unwrap();
    assert_eq!(recovered, vec![execution.id]);
    let reloaded = store.execution(execution.id).unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Failed);
    assert_eq!(reloaded.failure_reason.as_deref(), Some("lost worker"));
}

// ============================================================================
// SECTION: Pool Executor Tests
// ============================================================================

#[test]
fn pool_runs_submissions_in_parallel_workers() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let mut executions = Vec::new();
    for index in 0..4 {
        let group = store
            .ensure_group(
                &ProviderSlug::new("example"),
                &DiagnosticSlug::new("test-diagnostic"),
                &GroupKey::new([("member_id".to_string(), format!("r{index}i1p1f1"))]),
                now(),
            )
            .unwrap();
        executions.push(store.create_execution(group.id, "hash-1", &[], now()).unwrap());
    }
    let executor =
        LocalPoolExecutor::new(runner(&tmp, &store, Behavior::Succeed), Some(2)).unwrap();
    assert_eq!(executor.worker_count(), 2);
    for execution in &executions {
        executor.submit(execution.id).unwrap();
    }
    let summary = executor.join(Some(Duration::from_secs(30))).unwrap();
    assert_eq!(summary.submitted, 4);
    assert_eq!(summary.succeeded, 4);
    assert!(!summary.timed_out);
}

#[test]
fn pool_cancels_pending_executions() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let executor =
        LocalPoolExecutor::new(runner(&tmp, &store, Behavior::Succeed), Some(1)).unwrap();
    // Cancel before the execution is ever submitted to the pool.
    executor.cancel(execution.id).unwrap();
    let reloaded = store.execution(execution.id).unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Cancelled);
}

// ============================================================================
// SECTION: Queue Executor Tests
// ============================================================================

#[test]
fn queue_round_trips_requests_through_workers() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let broker: Arc<InMemoryBroker> = Arc::new(InMemoryBroker::new());
    let shared_runner = Arc::new(runner(&tmp, &store, Behavior::Succeed));

    let executor = QueueExecutor::new(
        Arc::clone(&broker) as Arc<dyn climate_eval_executor::MessageQueue>,
        Arc::clone(&shared_runner),
    );
    executor.submit(execution.id).unwrap();

    let worker = QueueWorker::new(
        broker as Arc<dyn climate_eval_executor::MessageQueue>,
        shared_runner,
        vec![run_topic("example", "test-diagnostic")],
        1,
    );
    let handled = worker.run_until_idle(Duration::from_millis(50)).unwrap();
    assert_eq!(handled, 1);

    let summary = executor.join(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(store.execution(execution.id).unwrap().status, ExecutionStatus::Succeeded);
}

#[test]
fn queue_application_failures_do_not_redeliver() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryEvaluationStore::new());
    let execution = pending_execution(&store);
    let broker: Arc<InMemoryBroker> = Arc::new(InMemoryBroker::new());
    let shared_runner = Arc::new(runner(&tmp, &store, Behavior::FailExecution));

    let executor = QueueExecutor::new(
        Arc::clone(&broker) as Arc<dyn climate_eval_executor::MessageQueue>,
        Arc::clone(&shared_runner),
    );
    executor.submit(execution.id).unwrap();

    let worker = QueueWorker::new(
        broker as Arc<dyn climate_eval_executor::MessageQueue>,
        shared_runner,
        vec![run_topic("example", "test-diagnostic")],
        3,
    );
    // One message, one handling: the application failure is terminal.
    assert_eq!(worker.run_until_idle(Duration::from_millis(50)).unwrap(), 1);
    let summary = executor.join(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(summary.failed, 1);
}
