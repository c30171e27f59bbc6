// crates/climate-eval-core/src/memory.rs
// ============================================================================
// Module: In-Memory Evaluation Store
// Description: Non-durable EvaluationStore used for tests and dry runs.
// Purpose: Provide a reference store implementation with full invariants.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryEvaluationStore`] implements the complete [`EvaluationStore`]
//! contract over process memory. It enforces the same invariants as the
//! durable backend (unique dataset versions, one running execution per group,
//! per-group dataset-hash uniqueness, legal status transitions) and is the
//! reference used by solver and executor tests. Output recording copies
//! files only when a results root is configured; otherwise rows are recorded
//! without touching the filesystem.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use crate::core::dataset::DatasetRecord;
use crate::core::dataset::FileRecord;
use crate::core::dataset::ResolvedDataset;
use crate::core::dataset::StoredDataset;
use crate::core::dataset::StoredFile;
use crate::core::diagnostic::DiagnosticSummary;
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
use crate::core::identifiers::FileId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::ProviderSlug;
use crate::core::identifiers::SourceType;
use crate::core::requirement::GroupKey;
use crate::core::time::Timestamp;
use crate::interfaces::DatasetUpsert;
use crate::interfaces::EvaluationStore;
use crate::interfaces::GroupFilter;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Inner State
// ============================================================================

/// One dataset row with its files.
#[derive(Debug, Clone)]
struct DatasetEntry {
    /// Stored dataset row.
    dataset: StoredDataset,
    /// Files belonging to the row.
    files: Vec<StoredFile>,
}

/// Mutable store state behind the mutex.
#[derive(Debug, Default)]
struct Inner {
    /// Dataset rows keyed by surrogate id.
    datasets: BTreeMap<DatasetId, DatasetEntry>,
    /// Registered diagnostics with their stale flag.
    diagnostics: BTreeMap<(ProviderSlug, DiagnosticSlug), bool>,
    /// Execution group rows keyed by surrogate id.
    groups: BTreeMap<ExecutionGroupId, ExecutionGroup>,
    /// Execution rows keyed by surrogate id.
    executions: BTreeMap<ExecutionId, Execution>,
    /// Recorded execution inputs.
    inputs: Vec<ExecutionInput>,
    /// Recorded execution outputs.
    outputs: Vec<ExecutionOutput>,
    /// Recorded scalar metric values.
    metrics: BTreeMap<ExecutionId, Vec<MetricValue>>,
    /// Recorded series metric values.
    series: BTreeMap<ExecutionId, Vec<SeriesMetricValue>>,
    /// Last heartbeat per running execution.
    heartbeats: BTreeMap<ExecutionId, Timestamp>,
    /// Advisory leases keyed by name.
    leases: BTreeMap<String, (String, i64)>,
    /// Next surrogate id.
    next_id: u64,
}

impl Inner {
    /// Allocates the next non-zero surrogate id.
    fn allocate(&mut self) -> NonZeroU64 {
        self.next_id += 1;
        NonZeroU64::new(self.next_id).unwrap_or(NonZeroU64::MIN)
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Non-durable evaluation store backed by process memory.
///
/// # Invariants
/// - Enforces the same boundary invariants as the durable backend.
/// - All state is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct InMemoryEvaluationStore {
    /// Mutable state behind one lock; transactions map to lock scopes.
    inner: Mutex<Inner>,
    /// Results root for output copying, when configured.
    results_root: Option<PathBuf>,
}

impl InMemoryEvaluationStore {
    /// Creates an empty store that records output rows without copying
    /// files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that copies recorded outputs under `root`.
    #[must_use]
    pub fn with_results_root(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            results_root: Some(root.into()),
        }
    }

    /// Locks the inner state, converting poisoning into a consistency error.
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Consistency("store mutex poisoned".to_string()))
    }

    /// Resolves the directory an execution's outputs are copied into.
    fn execution_results_dir(
        root: &Path,
        inner: &Inner,
        execution: &Execution,
    ) -> Result<PathBuf, StoreError> {
        let group = inner
            .groups
            .get(&execution.group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {}", execution.group_id)))?;
        Ok(root
            .join(group.provider_slug.as_str())
            .join(group.diagnostic_slug.as_str())
            .join(group.group_key.path_component())
            .join(execution.id.to_string()))
    }
}

/// Validates that every metric facet map equals the declared facet set.
fn validate_facets(
    declared: &BTreeSet<String>,
    facet_maps: impl Iterator<Item = BTreeSet<String>>,
) -> Result<(), StoreError> {
    for facets in facet_maps {
        if &facets != declared {
            return Err(StoreError::Invalid(format!(
                "metric facets {facets:?} do not match declared facets {declared:?}"
            )));
        }
    }
    Ok(())
}

impl EvaluationStore for InMemoryEvaluationStore {
    fn upsert_dataset(
        &self,
        record: &DatasetRecord,
        files: &[FileRecord],
        ingested_at: Timestamp,
    ) -> Result<DatasetUpsert, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.datasets.values().find(|entry| {
            entry.dataset.record.source_type == record.source_type
                && entry.dataset.record.instance_id == record.instance_id
                && entry.dataset.record.version == record.version
        }) {
            return Ok(DatasetUpsert {
                dataset_id: existing.dataset.id,
                created: false,
                superseded: None,
            });
        }

        let prior_active: Option<(DatasetId, DatasetVersion)> = inner
            .datasets
            .values()
            .find(|entry| {
                entry.dataset.active
                    && entry.dataset.record.source_type == record.source_type
                    && entry.dataset.record.instance_id == record.instance_id
            })
            .map(|entry| (entry.dataset.id, entry.dataset.record.version.clone()));

        let id = DatasetId::new(inner.allocate());
        let becomes_active =
            prior_active.as_ref().is_none_or(|(_, version)| record.version > *version);
        let mut superseded = None;
        if becomes_active && let Some((prior_id, _)) = prior_active {
            if let Some(entry) = inner.datasets.get_mut(&prior_id) {
                entry.dataset.active = false;
            }
            superseded = Some(prior_id);
        }

        let stored_files: Vec<StoredFile> = files
            .iter()
            .map(|file| StoredFile {
                id: FileId::new(inner.allocate()),
                dataset_id: id,
                record: file.clone(),
            })
            .collect();
        inner.datasets.insert(
            id,
            DatasetEntry {
                dataset: StoredDataset {
                    id,
                    record: record.clone(),
                    active: becomes_active,
                    retracted: false,
                    ingested_at,
                },
                files: stored_files,
            },
        );
        Ok(DatasetUpsert {
            dataset_id: id,
            created: true,
            superseded,
        })
    }

    fn active_datasets(&self, source_type: &SourceType) -> Result<Vec<ResolvedDataset>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .datasets
            .values()
            .filter(|entry| {
                entry.dataset.active
                    && !entry.dataset.retracted
                    && entry.dataset.record.source_type == *source_type
            })
            .map(|entry| ResolvedDataset {
                dataset: entry.dataset.clone(),
                files: entry.files.clone(),
            })
            .collect())
    }

    fn source_types(&self) -> Result<Vec<SourceType>, StoreError> {
        let inner = self.lock()?;
        let distinct: BTreeSet<SourceType> = inner
            .datasets
            .values()
            .map(|entry| entry.dataset.record.source_type.clone())
            .collect();
        Ok(distinct.into_iter().collect())
    }

    fn find_dataset(
        &self,
        source_type: &SourceType,
        instance_id: &InstanceId,
        version: &DatasetVersion,
    ) -> Result<Option<ResolvedDataset>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .datasets
            .values()
            .find(|entry| {
                entry.dataset.record.source_type == *source_type
                    && entry.dataset.record.instance_id == *instance_id
                    && entry.dataset.record.version == *version
            })
            .map(|entry| ResolvedDataset {
                dataset: entry.dataset.clone(),
                files: entry.files.clone(),
            }))
    }

    fn dataset_with_files(&self, dataset_id: DatasetId) -> Result<ResolvedDataset, StoreError> {
        let inner = self.lock()?;
        inner
            .datasets
            .get(&dataset_id)
            .map(|entry| ResolvedDataset {
                dataset: entry.dataset.clone(),
                files: entry.files.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(format!("dataset {dataset_id}")))
    }

    fn retract_dataset(&self, dataset_id: DatasetId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let entry = inner
            .datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| StoreError::NotFound(format!("dataset {dataset_id}")))?;
        entry.dataset.retracted = true;
        entry.dataset.active = false;
        Ok(())
    }

    fn register_diagnostic(
        &self,
        summary: &DiagnosticSummary,
        _now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .diagnostics
            .insert((summary.provider_slug.clone(), summary.diagnostic_slug.clone()), false);
        Ok(())
    }

    fn mark_unregistered_stale(
        &self,
        registered: &[(ProviderSlug, DiagnosticSlug)],
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let live: BTreeSet<(ProviderSlug, DiagnosticSlug)> = registered.iter().cloned().collect();
        let mut flagged = 0;
        let absent: Vec<(ProviderSlug, DiagnosticSlug)> =
            inner.diagnostics.keys().filter(|key| !live.contains(key)).cloned().collect();
        for key in &absent {
            if let Some(stale) = inner.diagnostics.get_mut(key) {
                *stale = true;
            }
        }
        for group in inner.groups.values_mut() {
            let key = (group.provider_slug.clone(), group.diagnostic_slug.clone());
            if !live.contains(&key) && !group.stale {
                group.stale = true;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    fn ensure_group(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        group_key: &GroupKey,
        now: Timestamp,
    ) -> Result<ExecutionGroup, StoreError> {
        let mut inner = self.lock()?;
        if let Some(group) = inner.groups.values().find(|group| {
            group.provider_slug == *provider
                && group.diagnostic_slug == *diagnostic
                && group.group_key == *group_key
        }) {
            return Ok(group.clone());
        }
        let id = ExecutionGroupId::new(inner.allocate());
        let group = ExecutionGroup {
            id,
            provider_slug: provider.clone(),
            diagnostic_slug: diagnostic.clone(),
            group_key: group_key.clone(),
            dirty: true,
            stale: false,
            latest_execution_id: None,
            created_at: now,
        };
        inner.groups.insert(id, group.clone());
        Ok(group)
    }

    fn find_execution_by_hash(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
    ) -> Result<Option<Execution>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .executions
            .values()
            .find(|execution| {
                execution.group_id == group_id && execution.dataset_hash == dataset_hash
            })
            .cloned())
    }

    fn create_execution(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
        inputs: &[(DatasetId, DatasetVersion)],
        _now: Timestamp,
    ) -> Result<Execution, StoreError> {
        let mut inner = self.lock()?;
        if !inner.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        if inner.executions.values().any(|execution| {
            execution.group_id == group_id && execution.dataset_hash == dataset_hash
        }) {
            return Err(StoreError::Conflict(format!(
                "execution with hash {dataset_hash} already exists in group {group_id}"
            )));
        }
        let id = ExecutionId::new(inner.allocate());
        let execution = Execution {
            id,
            group_id,
            dataset_hash: dataset_hash.to_string(),
            status: ExecutionStatus::Pending,
            started_at: None,
            finished_at: None,
            output_directory: None,
            log_path: None,
            retry_count: 0,
            failure_reason: None,
        };
        inner.executions.insert(id, execution.clone());
        for (dataset_id, version) in inputs {
            inner.inputs.push(ExecutionInput {
                execution_id: id,
                dataset_id: *dataset_id,
                version: version.clone(),
            });
        }
        if let Some(group) = inner.groups.get_mut(&group_id) {
            group.dirty = true;
            group.latest_execution_id = Some(id);
        }
        Ok(execution)
    }

    fn set_group_clean(&self, group_id: ExecutionGroupId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let group = inner
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        group.dirty = false;
        Ok(())
    }

    fn reconcile_group_staleness(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        live_keys: &[GroupKey],
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let live: BTreeSet<&GroupKey> = live_keys.iter().collect();
        let mut flagged = 0;
        for group in inner.groups.values_mut() {
            if group.provider_slug != *provider || group.diagnostic_slug != *diagnostic {
                continue;
            }
            let is_live = live.contains(&group.group_key);
            if !is_live && !group.stale {
                group.stale = true;
                flagged += 1;
            } else if is_live && group.stale {
                group.stale = false;
            }
        }
        Ok(flagged)
    }

    fn transition_execution(
        &self,
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        now: Timestamp,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::Invalid(format!("illegal transition {from} -> {to}")));
        }
        let mut inner = self.lock()?;
        if to == ExecutionStatus::Running {
            let group_id = inner
                .executions
                .get(&execution_id)
                .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?
                .group_id;
            let sibling_running = inner.executions.values().any(|execution| {
                execution.group_id == group_id
                    && execution.id != execution_id
                    && execution.status == ExecutionStatus::Running
            });
            if sibling_running {
                return Err(StoreError::Consistency(format!(
                    "group {group_id} already has a running execution"
                )));
            }
        }
        let execution = inner
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
        if execution.status != from {
            return Err(StoreError::Conflict(format!(
                "execution {execution_id} is {}, expected {from}",
                execution.status
            )));
        }
        execution.status = to;
        match to {
            ExecutionStatus::Running => execution.started_at = Some(now),
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                execution.finished_at = Some(now);
                if to == ExecutionStatus::Failed {
                    execution.failure_reason = failure_reason.map(ToString::to_string);
                }
            }
            ExecutionStatus::Pending => {}
        }
        if to != ExecutionStatus::Running {
            inner.heartbeats.remove(&execution_id);
        }
        Ok(())
    }

    fn retry_execution(&self, execution_id: ExecutionId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let execution = inner
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
        if execution.status != ExecutionStatus::Failed {
            return Err(StoreError::Conflict(format!(
                "execution {execution_id} is {}, expected failed",
                execution.status
            )));
        }
        execution.status = ExecutionStatus::Pending;
        execution.retry_count += 1;
        execution.failure_reason = None;
        execution.started_at = None;
        execution.finished_at = None;
        Ok(())
    }

    fn record_heartbeat(
        &self,
        execution_id: ExecutionId,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.heartbeats.insert(execution_id, now);
        Ok(())
    }

    fn recover_lost_executions(
        &self,
        stale_before: Timestamp,
        reason: &str,
        now: Timestamp,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let mut inner = self.lock()?;
        let mut recovered = Vec::new();
        let running: Vec<ExecutionId> = inner
            .executions
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Running)
            .map(|execution| execution.id)
            .collect();
        for id in running {
            let last_beat = inner.heartbeats.get(&id).copied();
            let lost = last_beat.is_none_or(|beat| beat < stale_before);
            if !lost {
                continue;
            }
            if let Some(execution) = inner.executions.get_mut(&id) {
                execution.status = ExecutionStatus::Failed;
                execution.failure_reason = Some(reason.to_string());
                execution.finished_at = Some(now);
            }
            inner.heartbeats.remove(&id);
            recovered.push(id);
        }
        Ok(recovered)
    }

    fn record_outputs(
        &self,
        execution_id: ExecutionId,
        source_dir: &Path,
        manifest: &[OutputManifestEntry],
    ) -> Result<(), StoreError> {
        for entry in manifest {
            if entry.relative_path.is_absolute() {
                return Err(StoreError::Invalid(format!(
                    "output path must be relative: {}",
                    entry.relative_path.display()
                )));
            }
        }
        let mut inner = self.lock()?;
        if let Some(root) = &self.results_root {
            let execution = inner
                .executions
                .get(&execution_id)
                .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?
                .clone();
            let target_dir = Self::execution_results_dir(root, &inner, &execution)?;
            for entry in manifest {
                let source = source_dir.join(&entry.relative_path);
                let target = target_dir.join(&entry.relative_path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
                }
                fs::copy(&source, &target).map_err(|err| StoreError::Io(err.to_string()))?;
            }
            let relative_dir = target_dir.strip_prefix(root).unwrap_or(&target_dir).to_path_buf();
            if let Some(execution) = inner.executions.get_mut(&execution_id) {
                execution.output_directory = Some(relative_dir);
            }
        }
        for entry in manifest {
            inner.outputs.push(ExecutionOutput {
                execution_id,
                entry: entry.clone(),
            });
        }
        Ok(())
    }

    fn record_metric_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[MetricValue],
    ) -> Result<(), StoreError> {
        validate_facets(
            declared_facets,
            values.iter().map(|value| value.facets.keys().cloned().collect()),
        )?;
        let mut inner = self.lock()?;
        inner.metrics.entry(execution_id).or_default().extend(values.iter().cloned());
        Ok(())
    }

    fn record_series_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[SeriesMetricValue],
    ) -> Result<(), StoreError> {
        validate_facets(
            declared_facets,
            values.iter().map(|value| value.facets.keys().cloned().collect()),
        )?;
        for value in values {
            if !value.is_aligned() {
                return Err(StoreError::Invalid(
                    "series index and values have different lengths".to_string(),
                ));
            }
        }
        let mut inner = self.lock()?;
        inner.series.entry(execution_id).or_default().extend(values.iter().cloned());
        Ok(())
    }

    fn execution(&self, execution_id: ExecutionId) -> Result<Execution, StoreError> {
        let inner = self.lock()?;
        inner
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))
    }

    fn group(&self, group_id: ExecutionGroupId) -> Result<ExecutionGroup, StoreError> {
        let inner = self.lock()?;
        inner
            .groups
            .get(&group_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))
    }

    fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<ExecutionGroup>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .groups
            .values()
            .filter(|group| filter.matches(&group.provider_slug, &group.diagnostic_slug))
            .filter(|group| !filter.dirty_only || group.dirty)
            .cloned()
            .collect())
    }

    fn list_executions(&self, group_id: ExecutionGroupId) -> Result<Vec<Execution>, StoreError> {
        let inner = self.lock()?;
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|execution| execution.group_id == group_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(executions)
    }

    fn pending_executions(&self) -> Result<Vec<Execution>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .executions
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Pending)
            .cloned()
            .collect())
    }

    fn execution_inputs(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionInput>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .inputs
            .iter()
            .filter(|input| input.execution_id == execution_id)
            .cloned()
            .collect())
    }

    fn execution_outputs(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionOutput>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .outputs
            .iter()
            .filter(|output| output.execution_id == execution_id)
            .cloned()
            .collect())
    }

    fn metric_values(&self, execution_id: ExecutionId) -> Result<Vec<MetricValue>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.metrics.get(&execution_id).cloned().unwrap_or_default())
    }

    fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let expires_at = now.unix_seconds().saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        match inner.leases.get(name) {
            Some((other, expiry)) if other != holder && *expiry > now.unix_seconds() => Ok(false),
            _ => {
                inner.leases.insert(name.to_string(), (holder.to_string(), expires_at));
                Ok(true)
            }
        }
    }

    fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some((current, _)) = inner.leases.get(name)
            && current == holder
        {
            inner.leases.remove(name);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::missing_docs_in_private_items,
        clippy::unwrap_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use crate::core::dataset::FacetMap;

    use super::*;

    fn record(instance: &str, version: &str) -> DatasetRecord {
        let mut facets = FacetMap::new();
        facets.insert("variable_id".to_string(), "tas".to_string());
        DatasetRecord {
            source_type: SourceType::cmip6(),
            instance_id: InstanceId::new(instance),
            version: DatasetVersion::new(version),
            facets,
        }
    }

    fn now() -> Timestamp {
        Timestamp::from_unix_seconds(1_000)
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = InMemoryEvaluationStore::new();
        let first = store.upsert_dataset(&record("a", "v1"), &[], now()).unwrap();
        let second = store.upsert_dataset(&record("a", "v1"), &[], now()).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.dataset_id, second.dataset_id);
        assert_eq!(store.active_datasets(&SourceType::cmip6()).unwrap().len(), 1);
    }

    #[test]
    fn newer_version_supersedes_active_row() {
        let store = InMemoryEvaluationStore::new();
        let old = store.upsert_dataset(&record("a", "v20190101"), &[], now()).unwrap();
        let new = store.upsert_dataset(&record("a", "v20210101"), &[], now()).unwrap();
        assert_eq!(new.superseded, Some(old.dataset_id));
        let active = store.active_datasets(&SourceType::cmip6()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].dataset.record.version.as_str(), "v20210101");
    }

    #[test]
    fn older_version_does_not_supersede() {
        let store = InMemoryEvaluationStore::new();
        store.upsert_dataset(&record("a", "v20210101"), &[], now()).unwrap();
        let old = store.upsert_dataset(&record("a", "v20190101"), &[], now()).unwrap();
        assert!(old.created);
        assert_eq!(old.superseded, None);
        let active = store.active_datasets(&SourceType::cmip6()).unwrap();
        assert_eq!(active[0].dataset.record.version.as_str(), "v20210101");
    }

    #[test]
    fn duplicate_hash_in_group_conflicts() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        store.create_execution(group.id, "hash", &[], now()).unwrap();
        let err = store.create_execution(group.id, "hash", &[], now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn second_running_execution_is_a_consistency_violation() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        let first = store.create_execution(group.id, "h1", &[], now()).unwrap();
        let second = store.create_execution(group.id, "h2", &[], now()).unwrap();
        store
            .transition_execution(
                first.id,
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                now(),
                None,
            )
            .unwrap();
        let err = store
            .transition_execution(
                second.id,
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                now(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Consistency(_)));
    }

    #[test]
    fn cas_transition_rejects_wrong_current_status() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        let execution = store.create_execution(group.id, "h", &[], now()).unwrap();
        let err = store
            .transition_execution(
                execution.id,
                ExecutionStatus::Running,
                ExecutionStatus::Succeeded,
                now(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn lost_executions_are_failed_with_reason() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        let execution = store.create_execution(group.id, "h", &[], now()).unwrap();
        store
            .transition_execution(
                execution.id,
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                now(),
                None,
            )
            .unwrap();
        store.record_heartbeat(execution.id, Timestamp::from_unix_seconds(1_000)).unwrap();
        let recovered = store
            .recover_lost_executions(
                Timestamp::from_unix_seconds(2_000),
                "lost worker",
                Timestamp::from_unix_seconds(2_100),
            )
            .unwrap();
        assert_eq!(recovered, vec![execution.id]);
        let reloaded = store.execution(execution.id).unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Failed);
        assert_eq!(reloaded.failure_reason.as_deref(), Some("lost worker"));

        store.retry_execution(execution.id).unwrap();
        let retried = store.execution(execution.id).unwrap();
        assert_eq!(retried.status, ExecutionStatus::Pending);
        assert_eq!(retried.retry_count, 1);
    }

    #[test]
    fn metric_values_require_declared_facets() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        let execution = store.create_execution(group.id, "h", &[], now()).unwrap();
        let declared: BTreeSet<String> = ["region".to_string()].into_iter().collect();
        let bad = MetricValue {
            facets: [("metric".to_string(), "bias".to_string())].into_iter().collect(),
            value: 1.0,
        };
        let err =
            store.record_metric_values(execution.id, &declared, &[bad]).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(store.metric_values(execution.id).unwrap().is_empty());
    }

    #[test]
    fn absolute_output_paths_are_rejected() {
        let store = InMemoryEvaluationStore::new();
        let group = store
            .ensure_group(
                &ProviderSlug::new("p"),
                &DiagnosticSlug::new("d"),
                &GroupKey::new([("a".to_string(), "1".to_string())]),
                now(),
            )
            .unwrap();
        let execution = store.create_execution(group.id, "h", &[], now()).unwrap();
        let entry = OutputManifestEntry::new("/abs/path.png", crate::core::OutputKind::Png);
        let err = store
            .record_outputs(execution.id, Path::new("/tmp"), &[entry])
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn lease_excludes_other_holders_until_expiry() {
        let store = InMemoryEvaluationStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire_lease("solver", "a", ttl, now()).unwrap());
        assert!(!store.acquire_lease("solver", "b", ttl, now()).unwrap());
        // Re-entrant for the same holder.
        assert!(store.acquire_lease("solver", "a", ttl, now()).unwrap());
        store.release_lease("solver", "a").unwrap();
        assert!(store.acquire_lease("solver", "b", ttl, now()).unwrap());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let store = InMemoryEvaluationStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.acquire_lease("solver", "a", ttl, now()).unwrap());
        let later = Timestamp::from_unix_seconds(now().unix_seconds() + 60);
        assert!(store.acquire_lease("solver", "b", ttl, later).unwrap());
    }
}
