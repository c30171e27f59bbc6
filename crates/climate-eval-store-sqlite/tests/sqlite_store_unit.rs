// crates/climate-eval-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Integrity Unit Tests
// Description: Targeted integrity tests for the SQLite evaluation store.
// Purpose: Validate lifecycle invariants, output recording, backups, and
//          lease coordination against a real database file.
// ============================================================================

//! ## Overview
//! Unit-level tests for the durable store:
//! - dataset upsert idempotence and version supersession
//! - compare-and-set status transitions and the one-running invariant
//! - relative-path enforcement and results copying
//! - metric facet validation
//! - migration backup retention
//! - advisory lease exclusivity

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
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use climate_eval_core::DatasetRecord;
use climate_eval_core::DatasetVersion;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::EvaluationStore;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::FacetMap;
use climate_eval_core::FileRecord;
use climate_eval_core::GroupKey;
use climate_eval_core::InstanceId;
use climate_eval_core::MetricValue;
use climate_eval_core::OutputKind;
use climate_eval_core::OutputManifestEntry;
use climate_eval_core::ProviderSlug;
use climate_eval_core::SeriesMetricValue;
use climate_eval_core::SourceType;
use climate_eval_core::StoreError;
use climate_eval_core::Timestamp;
use climate_eval_store_sqlite::SqliteEvaluationStore;
use climate_eval_store_sqlite::SqliteStoreConfig;
use climate_eval_store_sqlite::backup_database;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_store(tmp: &TempDir) -> SqliteEvaluationStore {
    let config = SqliteStoreConfig::new(tmp.path().join("eval.db"), tmp.path().join("results"));
    SqliteEvaluationStore::open(config).expect("open store")
}

fn now() -> Timestamp {
    Timestamp::from_unix_seconds(1_700_000_000)
}

fn record(instance: &str, version: &str) -> DatasetRecord {
    let mut facets = FacetMap::new();
    facets.insert("variable_id".to_string(), "tas".to_string());
    facets.insert("source_id".to_string(), "ACCESS-ESM1-5".to_string());
    DatasetRecord {
        source_type: SourceType::cmip6(),
        instance_id: InstanceId::new(instance),
        version: DatasetVersion::new(version),
        facets,
    }
}

fn group_key() -> GroupKey {
    GroupKey::new([
        ("source_id".to_string(), "ACCESS-ESM1-5".to_string()),
        ("variable_id".to_string(), "tas".to_string()),
    ])
}

fn make_group(store: &SqliteEvaluationStore) -> climate_eval_core::ExecutionGroup {
    store
        .ensure_group(
            &ProviderSlug::new("example"),
            &DiagnosticSlug::new("annual-mean"),
            &group_key(),
            now(),
        )
        .expect("ensure group")
}

// ============================================================================
// SECTION: Dataset Tests
// ============================================================================

#[test]
fn dataset_upsert_is_idempotent_across_reopens() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open_store(&tmp);
        let first = store.upsert_dataset(&record("CMIP6.a", "v1"), &[], now()).unwrap();
        assert!(first.created);
    }
    {
        let store = open_store(&tmp);
        let second = store.upsert_dataset(&record("CMIP6.a", "v1"), &[], now()).unwrap();
        assert!(!second.created);
        assert_eq!(store.active_datasets(&SourceType::cmip6()).unwrap().len(), 1);
    }
}

#[test]
fn newer_version_supersedes_and_retains_audit_row() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let old = store.upsert_dataset(&record("CMIP6.a", "v20190101"), &[], now()).unwrap();
    let new = store.upsert_dataset(&record("CMIP6.a", "v20210101"), &[], now()).unwrap();
    assert_eq!(new.superseded, Some(old.dataset_id));

    let active = store.active_datasets(&SourceType::cmip6()).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].dataset.record.version.as_str(), "v20210101");

    // The prior row is retained for audit.
    let prior = store
        .find_dataset(
            &SourceType::cmip6(),
            &InstanceId::new("CMIP6.a"),
            &DatasetVersion::new("v20190101"),
        )
        .unwrap()
        .expect("audit row");
    assert!(!prior.dataset.active);
}

#[test]
fn files_round_trip_with_time_ranges() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let range = climate_eval_core::TimeRange::from_months(1850, 1, 2014, 12).unwrap();
    let files = vec![FileRecord {
        path: PathBuf::from("/data/tas.nc"),
        size_bytes: 2048,
        checksum: "ab".repeat(32),
        variable_id: Some("tas".to_string()),
        time_range: Some(range),
    }];
    store.upsert_dataset(&record("CMIP6.a", "v1"), &files, now()).unwrap();

    let active = store.active_datasets(&SourceType::cmip6()).unwrap();
    assert_eq!(active[0].files.len(), 1);
    let stored = &active[0].files[0].record;
    assert_eq!(stored.time_range, Some(range));
    assert_eq!(stored.size_bytes, 2048);
}

#[test]
fn relative_file_paths_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let files = vec![FileRecord {
        path: PathBuf::from("relative/tas.nc"),
        size_bytes: 0,
        checksum: String::new(),
        variable_id: None,
        time_range: None,
    }];
    let err = store.upsert_dataset(&record("CMIP6.a", "v1"), &files, now()).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn retracted_datasets_leave_the_active_view() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let upsert = store.upsert_dataset(&record("CMIP6.a", "v1"), &[], now()).unwrap();
    store.retract_dataset(upsert.dataset_id).unwrap();
    assert!(store.active_datasets(&SourceType::cmip6()).unwrap().is_empty());
    // Row still exists for audit.
    assert!(store.dataset_with_files(upsert.dataset_id).unwrap().dataset.retracted);
}

// ============================================================================
// SECTION: Lifecycle Tests
// ============================================================================

#[test]
fn group_upsert_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let first = make_group(&store);
    let second = make_group(&store);
    assert_eq!(first.id, second.id);
    assert!(first.dirty);
}

#[test]
fn duplicate_dataset_hash_conflicts_within_group() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let err = store.create_execution(group.id, "hash-1", &[], now()).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn one_running_execution_per_group_is_enforced() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let first = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let second = store.create_execution(group.id, "hash-2", &[], now()).unwrap();

    store
        .transition_execution(first.id, ExecutionStatus::Pending, ExecutionStatus::Running, now(), None)
        .unwrap();
    let err = store
        .transition_execution(second.id, ExecutionStatus::Pending, ExecutionStatus::Running, now(), None)
        .unwrap_err();
    assert!(matches!(err, StoreError::Consistency(_)));
}

#[test]
fn cas_transition_rejects_stale_expectations() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
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
fn pending_to_succeeded_is_illegal() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let err = store
        .transition_execution(
            execution.id,
            ExecutionStatus::Pending,
            ExecutionStatus::Succeeded,
            now(),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn failed_executions_retry_to_pending() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    store
        .transition_execution(execution.id, ExecutionStatus::Pending, ExecutionStatus::Running, now(), None)
        .unwrap();
    store
        .transition_execution(
            execution.id,
            ExecutionStatus::Running,
            ExecutionStatus::Failed,
            now(),
            Some("diagnostic exited with status 1"),
        )
        .unwrap();
    let failed = store.execution(execution.id).unwrap();
    assert_eq!(failed.failure_reason.as_deref(), Some("diagnostic exited with status 1"));

    store.retry_execution(execution.id).unwrap();
    let retried = store.execution(execution.id).unwrap();
    assert_eq!(retried.status, ExecutionStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.failure_reason, None);

    // Retrying a non-failed execution conflicts.
    assert!(matches!(store.retry_execution(execution.id), Err(StoreError::Conflict(_))));
}

#[test]
fn lost_workers_are_failed_on_recovery() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    store
        .transition_execution(execution.id, ExecutionStatus::Pending, ExecutionStatus::Running, now(), None)
        .unwrap();

    let stale_before = Timestamp::from_unix_seconds(now().unix_seconds() + 600);
    let recovered = store
        .recover_lost_executions(stale_before, "lost worker", stale_before)
        .unwrap();
    assert_eq!(recovered, vec![execution.id]);
    let failed = store.execution(execution.id).unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("lost worker"));
}

#[test]
fn fresh_heartbeats_are_not_recovered() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    store
        .transition_execution(execution.id, ExecutionStatus::Pending, ExecutionStatus::Running, now(), None)
        .unwrap();
    let later = Timestamp::from_unix_seconds(now().unix_seconds() + 500);
    store.record_heartbeat(execution.id, later).unwrap();

    let recovered = store
        .recover_lost_executions(Timestamp::from_unix_seconds(now().unix_seconds() + 100), "lost worker", later)
        .unwrap();
    assert!(recovered.is_empty());
}

// ============================================================================
// SECTION: Output and Metric Tests
// ============================================================================

#[test]
fn outputs_are_copied_under_the_results_root() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();

    let work = tmp.path().join("work");
    fs::create_dir_all(work.join("plots")).unwrap();
    fs::write(work.join("output.json"), b"{}").unwrap();
    fs::write(work.join("plots/bias.png"), b"png").unwrap();
    fs::write(work.join("out.log"), b"log line").unwrap();

    let manifest = vec![
        OutputManifestEntry::new("output.json", OutputKind::Json),
        OutputManifestEntry::new("plots/bias.png", OutputKind::Png),
        OutputManifestEntry::new("out.log", OutputKind::Log),
    ];
    store.record_outputs(execution.id, &work, &manifest).unwrap();

    let reloaded = store.execution(execution.id).unwrap();
    let output_dir = reloaded.output_directory.expect("output dir recorded");
    assert!(output_dir.is_relative());

    // Relative paths joined with the results root reproduce the copies.
    let absolute = store.results_root().join(&output_dir);
    assert!(absolute.join("output.json").is_file());
    assert!(absolute.join("plots/bias.png").is_file());
    assert_eq!(store.execution_outputs(execution.id).unwrap().len(), 3);
    assert!(reloaded.log_path.expect("log recorded").is_relative());
}

#[test]
fn absolute_manifest_paths_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let manifest = vec![OutputManifestEntry::new("/etc/passwd", OutputKind::Json)];
    let err = store.record_outputs(execution.id, tmp.path(), &manifest).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(store.execution_outputs(execution.id).unwrap().is_empty());
}

#[test]
fn metric_values_validate_declared_facets() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let declared: BTreeSet<String> =
        ["region".to_string(), "metric".to_string()].into_iter().collect();

    let good = MetricValue {
        facets: [
            ("region".to_string(), "global".to_string()),
            ("metric".to_string(), "bias".to_string()),
        ]
        .into_iter()
        .collect(),
        value: 0.25,
    };
    store.record_metric_values(execution.id, &declared, &[good.clone()]).unwrap();
    assert_eq!(store.metric_values(execution.id).unwrap(), vec![good]);

    let unknown_facet = MetricValue {
        facets: [
            ("region".to_string(), "global".to_string()),
            ("metric".to_string(), "bias".to_string()),
            ("extra".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect(),
        value: 1.0,
    };
    let err = store.record_metric_values(execution.id, &declared, &[unknown_facet]).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn misaligned_series_values_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let group = make_group(&store);
    let execution = store.create_execution(group.id, "hash-1", &[], now()).unwrap();
    let declared: BTreeSet<String> = ["region".to_string()].into_iter().collect();
    let series = SeriesMetricValue {
        facets: [("region".to_string(), "global".to_string())].into_iter().collect(),
        index_name: "year".to_string(),
        index: vec!["1850".to_string(), "1851".to_string()],
        values: vec![0.1],
    };
    let err = store.record_series_values(execution.id, &declared, &[series]).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

// ============================================================================
// SECTION: Backup and Lease Tests
// ============================================================================

#[test]
fn backups_are_timestamped_and_pruned() {
    let tmp = TempDir::new().unwrap();
    let mut config =
        SqliteStoreConfig::new(tmp.path().join("eval.db"), tmp.path().join("results"));
    config.max_backups = 2;
    drop(SqliteEvaluationStore::open(config.clone()).unwrap());

    // Simulate repeated migrations; use distinct timestamps via suffix files.
    for stamp in 0..4 {
        let backup = config.path.with_extension(format!("backup.{stamp}"));
        fs::copy(&config.path, &backup).unwrap();
    }
    backup_database(&config).unwrap();

    let backups: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.file_name().to_string_lossy().starts_with("eval.backup.")
        })
        .collect();
    assert_eq!(backups.len(), config.max_backups);
}

#[test]
fn lease_is_exclusive_until_released_or_expired() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    let ttl = Duration::from_secs(60);
    assert!(store.acquire_lease("solver", "a", ttl, now()).unwrap());
    assert!(!store.acquire_lease("solver", "b", ttl, now()).unwrap());
    // Re-entrant for the same holder.
    assert!(store.acquire_lease("solver", "a", ttl, now()).unwrap());

    store.release_lease("solver", "a").unwrap();
    assert!(store.acquire_lease("solver", "b", ttl, now()).unwrap());

    // Expired leases can be taken over.
    let later = Timestamp::from_unix_seconds(now().unix_seconds() + 120);
    assert!(store.acquire_lease("solver", "c", ttl, later).unwrap());
}

#[test]
fn solver_runs_against_the_durable_store() {
    use climate_eval_core::DataRequirement;
    use climate_eval_core::DiagnosticSummary;
    use climate_eval_core::FacetFilter;
    use climate_eval_core::FacetMatch;
    use climate_eval_core::SolveOptions;
    use climate_eval_core::solve;

    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp);
    store.upsert_dataset(&record("CMIP6.a", "v1"), &[], now()).unwrap();
    let diagnostic = DiagnosticSummary {
        provider_slug: ProviderSlug::new("example"),
        diagnostic_slug: DiagnosticSlug::new("annual-mean"),
        data_requirements: vec![DataRequirement {
            source_type: SourceType::cmip6(),
            filters: vec![FacetFilter::keep([("variable_id", FacetMatch::from("tas"))])],
            group_by: vec!["source_id".to_string(), "variable_id".to_string()],
            constraints: Vec::new(),
        }],
        facets: BTreeSet::new(),
    };

    let first = solve(&store, &[diagnostic.clone()], &SolveOptions::default(), now()).unwrap();
    assert_eq!(first.new_executions.len(), 1);
    let second = solve(&store, &[diagnostic], &SolveOptions::default(), now()).unwrap();
    assert!(second.new_executions.is_empty());
}
