// crates/climate-eval-core/src/interfaces/mod.rs
// ============================================================================
// Module: Climate Eval Interfaces
// Description: Backend-agnostic interfaces for storage, execution, and plugins.
// Purpose: Define the contract surfaces used by the evaluation engine.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the evaluation engine integrates with its
//! collaborators without embedding backend-specific details. The store is the
//! only mutable shared state: workers coordinate exclusively through it, the
//! results directory, and an optional message broker. Implementations must be
//! deterministic and fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::cmec::BundleError;
use crate::core::dataset::DatasetRecord;
use crate::core::dataset::FileRecord;
use crate::core::dataset::ResolvedDataset;
use crate::core::diagnostic::DiagnosticSummary;
use crate::core::diagnostic::ExecutionDefinition;
use crate::core::diagnostic::ExecutionResult;
use crate::core::execution::Execution;
use crate::core::execution::ExecutionGroup;
use crate::core::execution::ExecutionInput;
use crate::core::execution::ExecutionOutput;
use crate::core::execution::ExecutionStatus;
use crate::core::execution::MetricValue;
use crate::core::execution::OutputManifestEntry;
use crate::core::execution::SeriesMetricValue;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::DatasetVersion;
use crate::core::identifiers::DiagnosticSlug;
use crate::core::identifiers::ExecutionGroupId;
use crate::core::identifiers::ExecutionId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::ProviderSlug;
use crate::core::identifiers::SourceType;
use crate::core::requirement::DataRequirement;
use crate::core::requirement::GroupKey;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Evaluation store errors, grouped by semantic class.
///
/// # Invariants
/// - `Consistency` indicates an invariant violation and is always fatal.
/// - `Io` and `Db` are infrastructure failures; callers retry with backoff
///   before surfacing them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error (infrastructure).
    #[error("store io error: {0}")]
    Io(String),
    /// Backing database error (infrastructure).
    #[error("store db error: {0}")]
    Db(String),
    /// Invalid input rejected at the store boundary.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Requested row does not exist.
    #[error("store row not found: {0}")]
    NotFound(String),
    /// Compare-and-set lost against a concurrent writer.
    #[error("store transition conflict: {0}")]
    Conflict(String),
    /// Invariant violation detected at the store boundary; indicates a bug.
    #[error("store consistency violation: {0}")]
    Consistency(String),
    /// Metric or output bundle failed validation.
    #[error("bundle validation failure: {0}")]
    Bundle(#[from] BundleError),
}

// ============================================================================
// SECTION: Store Result Types
// ============================================================================

/// Outcome of a dataset upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUpsert {
    /// Row key of the upserted dataset version.
    pub dataset_id: DatasetId,
    /// True when a new row was created; false when the row already existed.
    pub created: bool,
    /// Prior active row that this upsert superseded, when any.
    pub superseded: Option<DatasetId>,
}

/// Filter for execution group listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    /// Case-sensitive substring filter on the provider slug.
    pub provider: Option<String>,
    /// Case-sensitive substring filter on the diagnostic slug.
    pub diagnostic: Option<String>,
    /// Restrict to dirty groups.
    pub dirty_only: bool,
}

impl GroupFilter {
    /// Returns true when the provider/diagnostic pair passes the filter.
    #[must_use]
    pub fn matches(&self, provider: &ProviderSlug, diagnostic: &DiagnosticSlug) -> bool {
        if let Some(needle) = &self.provider
            && !provider.as_str().contains(needle.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.diagnostic
            && !diagnostic.as_str().contains(needle.as_str())
        {
            return false;
        }
        true
    }
}

// ============================================================================
// SECTION: Evaluation Store
// ============================================================================

/// Transactional store over datasets, groups, executions, and results.
///
/// # Invariants
/// - At most one `running` execution per group (enforced by the backend).
/// - `dataset_hash` is unique within a group.
/// - Output paths are stored relative to the results root.
pub trait EvaluationStore: Send + Sync {
    // ---- datasets ----

    /// Idempotently upserts one dataset version with its files.
    ///
    /// Re-upserting an identical record changes nothing. A strictly newer
    /// version supersedes the prior active row; the prior row is retained.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure or invalid records.
    fn upsert_dataset(
        &self,
        record: &DatasetRecord,
        files: &[FileRecord],
        ingested_at: Timestamp,
    ) -> Result<DatasetUpsert, StoreError>;

    /// Returns all active, non-retracted datasets of a source type with
    /// their files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn active_datasets(&self, source_type: &SourceType) -> Result<Vec<ResolvedDataset>, StoreError>;

    /// Returns the distinct source types present in the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn source_types(&self) -> Result<Vec<SourceType>, StoreError>;

    /// Looks up one dataset version with its files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn find_dataset(
        &self,
        source_type: &SourceType,
        instance_id: &InstanceId,
        version: &DatasetVersion,
    ) -> Result<Option<ResolvedDataset>, StoreError>;

    /// Loads a dataset row with its files by surrogate key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    fn dataset_with_files(&self, dataset_id: DatasetId) -> Result<ResolvedDataset, StoreError>;

    /// Soft-deletes a dataset row; its files stay recorded for audit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn retract_dataset(&self, dataset_id: DatasetId) -> Result<(), StoreError>;

    // ---- diagnostics ----

    /// Records a registered diagnostic, clearing any stale flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn register_diagnostic(&self, summary: &DiagnosticSummary, now: Timestamp)
    -> Result<(), StoreError>;

    /// Flags groups of diagnostics absent from `registered` as stale.
    ///
    /// Stale groups and their executions are never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn mark_unregistered_stale(
        &self,
        registered: &[(ProviderSlug, DiagnosticSlug)],
    ) -> Result<u64, StoreError>;

    // ---- groups and executions ----

    /// Idempotently upserts an execution group by `(diagnostic, group_key)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn ensure_group(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        group_key: &GroupKey,
        now: Timestamp,
    ) -> Result<ExecutionGroup, StoreError>;

    /// Finds an execution of a group by dataset hash.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn find_execution_by_hash(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
    ) -> Result<Option<Execution>, StoreError>;

    /// Creates a pending execution, records its inputs, marks the group
    /// dirty, and updates the group's latest-execution edge in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `(group, dataset_hash)` already
    /// exists.
    fn create_execution(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
        inputs: &[(DatasetId, DatasetVersion)],
        now: Timestamp,
    ) -> Result<Execution, StoreError>;

    /// Marks a group clean (a succeeded execution matches the resolved set).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn set_group_clean(&self, group_id: ExecutionGroupId) -> Result<(), StoreError>;

    /// Flags groups of one diagnostic whose keys are absent from
    /// `live_keys` as stale, and clears the flag on keys present again.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn reconcile_group_staleness(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        live_keys: &[GroupKey],
    ) -> Result<u64, StoreError>;

    /// Transitions an execution between statuses with compare-and-set.
    ///
    /// Sets `started_at` on entry to `running`, `finished_at` on any
    /// terminal status, and `failure_reason` on `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the current status is not
    /// `from`, and [`StoreError::Invalid`] when `from → to` is not a legal
    /// transition.
    fn transition_execution(
        &self,
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        now: Timestamp,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Retries a failed execution: `failed → pending`, incrementing the
    /// retry count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the execution is not `failed`.
    fn retry_execution(&self, execution_id: ExecutionId) -> Result<(), StoreError>;

    /// Records a worker heartbeat for a running execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn record_heartbeat(&self, execution_id: ExecutionId, now: Timestamp)
    -> Result<(), StoreError>;

    /// Fails running executions whose last heartbeat is older than
    /// `stale_before`, recording `reason`. Returns the affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn recover_lost_executions(
        &self,
        stale_before: Timestamp,
        reason: &str,
        now: Timestamp,
    ) -> Result<Vec<ExecutionId>, StoreError>;

    // ---- results ----

    /// Copies manifest files from `source_dir` into the results root under
    /// the execution's directory and records the rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when a manifest path is absolute and
    /// [`StoreError::Io`] when a copy fails.
    fn record_outputs(
        &self,
        execution_id: ExecutionId,
        source_dir: &Path,
        manifest: &[OutputManifestEntry],
    ) -> Result<(), StoreError>;

    /// Validates scalar metric values against the declared facets and
    /// inserts them; inserts nothing on any validation failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when a value's facets do not equal
    /// the declared set.
    fn record_metric_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[MetricValue],
    ) -> Result<(), StoreError>;

    /// Validates series metric values against the declared facets and
    /// inserts them; inserts nothing on any validation failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] on facet mismatch or misaligned
    /// series.
    fn record_series_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[SeriesMetricValue],
    ) -> Result<(), StoreError>;

    // ---- reads ----

    /// Loads one execution row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    fn execution(&self, execution_id: ExecutionId) -> Result<Execution, StoreError>;

    /// Loads one execution group row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the row does not exist.
    fn group(&self, group_id: ExecutionGroupId) -> Result<ExecutionGroup, StoreError>;

    /// Lists groups passing the filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<ExecutionGroup>, StoreError>;

    /// Lists all executions of a group, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn list_executions(&self, group_id: ExecutionGroupId) -> Result<Vec<Execution>, StoreError>;

    /// Lists all pending executions across groups.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn pending_executions(&self) -> Result<Vec<Execution>, StoreError>;

    /// Lists the recorded inputs of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn execution_inputs(&self, execution_id: ExecutionId)
    -> Result<Vec<ExecutionInput>, StoreError>;

    /// Lists the recorded outputs of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn execution_outputs(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionOutput>, StoreError>;

    /// Lists the scalar metric values of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn metric_values(&self, execution_id: ExecutionId) -> Result<Vec<MetricValue>, StoreError>;

    // ---- coordination ----

    /// Acquires the named solver advisory lease, returning false when
    /// another holder owns an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Releases the named lease when held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure.
    fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Diagnostic Plugin Contract
// ============================================================================

/// Diagnostic execution errors reported by providers.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DiagnosticError {
    /// The diagnostic failed while executing.
    #[error("diagnostic execution failure: {0}")]
    Execution(String),
    /// The diagnostic produced an invalid result bundle.
    #[error("diagnostic result failure: {0}")]
    Result(String),
}

/// One unit of analysis declared by a provider.
///
/// Implementations never write outside `definition.output_directory` and
/// `definition.scratch_directory`.
pub trait Diagnostic: Send + Sync {
    /// Returns the diagnostic slug.
    fn slug(&self) -> DiagnosticSlug;

    /// Returns the ordered dataset requirements.
    fn data_requirements(&self) -> Vec<DataRequirement>;

    /// Returns the facet names emitted on metric values.
    fn facets(&self) -> BTreeSet<String>;

    /// Runs the diagnostic, writing files under the definition's output
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticError`] when the run fails.
    fn execute(&self, definition: &ExecutionDefinition) -> Result<(), DiagnosticError>;

    /// Builds the CMEC result pair after a successful `execute`.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticError`] when the bundles cannot be produced.
    fn build_execution_result(
        &self,
        definition: &ExecutionDefinition,
    ) -> Result<ExecutionResult, DiagnosticError>;
}

/// A plugin registering one or more diagnostics.
pub trait DiagnosticProvider: Send + Sync {
    /// Returns the provider slug.
    fn slug(&self) -> ProviderSlug;

    /// Returns the provider version string.
    fn version(&self) -> String;

    /// Returns the provider's diagnostics in declaration order.
    fn diagnostics(&self) -> Vec<Arc<dyn Diagnostic>>;
}

/// Resolves registered diagnostics by provider and slug.
///
/// Implemented by the provider registry; consumed by executors and the
/// solver driver.
pub trait DiagnosticLookup: Send + Sync {
    /// Returns the diagnostic registered under the given slugs.
    fn diagnostic(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
    ) -> Option<Arc<dyn Diagnostic>>;

    /// Returns metadata summaries for every registered diagnostic.
    fn summaries(&self) -> Vec<DiagnosticSummary>;
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Executor errors.
///
/// # Invariants
/// - Per-execution failures are recorded on the execution row, never
///   surfaced here; these variants are infrastructure-level only.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Submission was rejected (queue full, shut down).
    #[error("executor rejected submission: {0}")]
    Rejected(String),
    /// Broker or scheduler infrastructure failure.
    #[error("executor infrastructure failure: {0}")]
    Infrastructure(String),
    /// Store interaction failed.
    #[error("executor store failure: {0}")]
    Store(#[from] StoreError),
}

/// Handle returned by a non-blocking submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Execution accepted for processing.
    pub execution_id: ExecutionId,
}

/// Terminal summary returned by [`Executor::join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorSummary {
    /// Executions submitted since the last join.
    pub submitted: u64,
    /// Executions that succeeded.
    pub succeeded: u64,
    /// Executions that failed.
    pub failed: u64,
    /// Executions that were cancelled.
    pub cancelled: u64,
    /// True when join returned because the timeout elapsed.
    pub timed_out: bool,
}

impl ExecutorSummary {
    /// Returns true when every submitted execution succeeded and the join
    /// completed in time.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && !self.timed_out
    }
}

/// Polymorphic execution backend.
///
/// Variants never compute results directly; they invoke the provider's
/// diagnostic as an opaque unit and report back through the store.
pub trait Executor: Send + Sync {
    /// Accepts an execution for processing; non-blocking.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] when the submission cannot be accepted.
    fn submit(&self, execution_id: ExecutionId) -> Result<Submission, ExecutorError>;

    /// Waits until all submitted executions terminate or the timeout
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on infrastructure failure.
    fn join(&self, timeout: Option<Duration>) -> Result<ExecutorSummary, ExecutorError>;

    /// Requests best-effort cancellation of one execution.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on infrastructure failure.
    fn cancel(&self, execution_id: ExecutionId) -> Result<(), ExecutorError>;
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_filter_is_case_sensitive_substring() {
        let filter = GroupFilter {
            provider: Some("esm".to_string()),
            diagnostic: None,
            dirty_only: false,
        };
        assert!(filter.matches(&ProviderSlug::new("esmvaltool"), &DiagnosticSlug::new("x")));
        assert!(!filter.matches(&ProviderSlug::new("ESMValTool"), &DiagnosticSlug::new("x")));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = GroupFilter::default();
        assert!(filter.matches(&ProviderSlug::new("anything"), &DiagnosticSlug::new("at-all")));
    }

    #[test]
    fn summary_cleanliness_requires_no_losses() {
        let clean = ExecutorSummary {
            submitted: 3,
            succeeded: 3,
            ..ExecutorSummary::default()
        };
        assert!(clean.is_clean());
        let failed = ExecutorSummary {
            submitted: 3,
            succeeded: 2,
            failed: 1,
            ..ExecutorSummary::default()
        };
        assert!(!failed.is_clean());
    }
}
