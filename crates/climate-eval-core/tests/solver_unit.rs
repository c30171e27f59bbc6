// crates/climate-eval-core/tests/solver_unit.rs
// ============================================================================
// Module: Solver Unit Tests
// Description: Solve idempotence, group expansion, and determinism checks.
// Purpose: Validate the resolver/solver pipeline against the reference store.
// ============================================================================

//! ## Overview
//! Exercises the solver over the in-memory reference store:
//! - one group and one pending execution per unique facet combination
//! - repeated solves with an unchanged catalog create nothing new
//! - version supersession dirties the group with a fresh dataset hash
//! - constraint failures drop candidates without erroring

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

use climate_eval_core::DataRequirement;
use climate_eval_core::DatasetRecord;
use climate_eval_core::DatasetVersion;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::DiagnosticSummary;
use climate_eval_core::EvaluationStore;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::FacetFilter;
use climate_eval_core::FacetMap;
use climate_eval_core::FacetMatch;
use climate_eval_core::FileRecord;
use climate_eval_core::GroupConstraint;
use climate_eval_core::InMemoryEvaluationStore;
use climate_eval_core::InstanceId;
use climate_eval_core::ProviderSlug;
use climate_eval_core::SolveOptions;
use climate_eval_core::SourceType;
use climate_eval_core::TimeRange;
use climate_eval_core::Timestamp;
use climate_eval_core::solve;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn now() -> Timestamp {
    Timestamp::from_unix_seconds(1_700_000_000)
}

fn cmip6_record(variable: &str, experiment: &str, member: &str) -> DatasetRecord {
    let mut facets = FacetMap::new();
    facets.insert("source_id".to_string(), "ACCESS-ESM1-5".to_string());
    facets.insert("experiment_id".to_string(), experiment.to_string());
    facets.insert("variable_id".to_string(), variable.to_string());
    facets.insert("member_id".to_string(), member.to_string());
    DatasetRecord {
        source_type: SourceType::cmip6(),
        instance_id: InstanceId::new(format!(
            "CMIP6.CMIP.CSIRO.ACCESS-ESM1-5.{experiment}.{member}.Amon.{variable}.gn"
        )),
        version: DatasetVersion::new("v20210101"),
        facets,
    }
}

fn file_for(instance: &str, range: Option<TimeRange>) -> FileRecord {
    FileRecord {
        path: format!("/data/{instance}.nc").into(),
        size_bytes: 1024,
        checksum: "00".repeat(32),
        variable_id: Some("tas".to_string()),
        time_range: range,
    }
}

fn grouping_diagnostic() -> DiagnosticSummary {
    DiagnosticSummary {
        provider_slug: ProviderSlug::new("example"),
        diagnostic_slug: DiagnosticSlug::new("annual-mean"),
        data_requirements: vec![DataRequirement {
            source_type: SourceType::cmip6(),
            filters: vec![FacetFilter::keep([("variable_id", FacetMatch::from("tas"))])],
            group_by: vec![
                "source_id".to_string(),
                "experiment_id".to_string(),
                "variable_id".to_string(),
                "member_id".to_string(),
            ],
            constraints: Vec::new(),
        }],
        facets: BTreeSet::from(["region".to_string()]),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn first_solve_creates_one_group_and_execution() {
    let store = InMemoryEvaluationStore::new();
    store
        .upsert_dataset(&cmip6_record("tas", "historical", "r1i1p1f1"), &[], now())
        .unwrap();
    let diagnostics = vec![grouping_diagnostic()];

    let outcome = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    assert_eq!(outcome.new_executions.len(), 1);

    let groups = store.list_groups(&climate_eval_core::GroupFilter::default()).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0].group_key.canonical(),
        "experiment_id=historical;member_id=r1i1p1f1;source_id=ACCESS-ESM1-5;variable_id=tas"
    );
    let executions = store.list_executions(groups[0].id).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Pending);
}

#[test]
fn second_solve_with_unchanged_catalog_creates_nothing() {
    let store = InMemoryEvaluationStore::new();
    store
        .upsert_dataset(&cmip6_record("tas", "historical", "r1i1p1f1"), &[], now())
        .unwrap();
    let diagnostics = vec![grouping_diagnostic()];

    let first = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    assert_eq!(first.new_executions.len(), 1);
    let second = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    assert!(second.new_executions.is_empty());
    assert_eq!(second.already_tracked, 1);
}

#[test]
fn filtered_variables_expand_into_one_group_each() {
    let store = InMemoryEvaluationStore::new();
    for (variable, experiment, member) in [
        ("ts", "historical", "r1i1p1f1"),
        ("ts", "ssp119", "r1i1p1f1"),
        ("ts", "historical", "r2i1p1f1"),
        ("pr", "historical", "r1i1p1f1"),
    ] {
        store.upsert_dataset(&cmip6_record(variable, experiment, member), &[], now()).unwrap();
    }
    let mut diagnostic = grouping_diagnostic();
    diagnostic.data_requirements[0].filters =
        vec![FacetFilter::keep([("variable_id", FacetMatch::from("ts"))])];

    let outcome = solve(&store, &[diagnostic], &SolveOptions::default(), now()).unwrap();
    assert_eq!(outcome.new_executions.len(), 3);
    let groups = store.list_groups(&climate_eval_core::GroupFilter::default()).unwrap();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|group| group.group_key.canonical().contains("variable_id=ts")));
}

#[test]
fn version_supersession_enqueues_new_hash() {
    let store = InMemoryEvaluationStore::new();
    store
        .upsert_dataset(&cmip6_record("tas", "historical", "r1i1p1f1"), &[], now())
        .unwrap();
    let diagnostics = vec![grouping_diagnostic()];
    let first = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    let first_execution = store.execution(first.new_executions[0]).unwrap();

    // Mark the first execution as succeeded so the group becomes clean.
    store
        .transition_execution(
            first_execution.id,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            now(),
            None,
        )
        .unwrap();
    store
        .transition_execution(
            first_execution.id,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            now(),
            None,
        )
        .unwrap();
    let clean = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    assert!(clean.new_executions.is_empty());
    assert_eq!(clean.up_to_date, 1);

    // Ingest a strictly newer version of the same instance.
    let mut newer = cmip6_record("tas", "historical", "r1i1p1f1");
    newer.version = DatasetVersion::new("v20230601");
    store.upsert_dataset(&newer, &[], now()).unwrap();

    let after = solve(&store, &diagnostics, &SolveOptions::default(), now()).unwrap();
    assert_eq!(after.new_executions.len(), 1);
    let second_execution = store.execution(after.new_executions[0]).unwrap();
    assert_eq!(second_execution.group_id, first_execution.group_id);
    assert_ne!(second_execution.dataset_hash, first_execution.dataset_hash);
    let group = store.group(second_execution.group_id).unwrap();
    assert!(group.dirty);
}

#[test]
fn contiguity_gap_drops_the_candidate() {
    let store = InMemoryEvaluationStore::new();
    let record = cmip6_record("tas", "historical", "r1i1p1f1");
    let files = vec![
        file_for("part1", TimeRange::from_months(1850, 1, 1899, 12)),
        file_for("part2", TimeRange::from_months(1950, 1, 1999, 12)),
    ];
    store.upsert_dataset(&record, &files, now()).unwrap();

    let mut diagnostic = grouping_diagnostic();
    diagnostic.data_requirements[0].constraints =
        vec![GroupConstraint::RequireContiguousTimerange {
            group_by: vec!["instance_id".to_string()],
        }];

    let outcome = solve(&store, &[diagnostic], &SolveOptions::default(), now()).unwrap();
    assert!(outcome.new_executions.is_empty());
    assert!(store.list_groups(&climate_eval_core::GroupFilter::default()).unwrap().is_empty());
}

#[test]
fn dry_run_creates_no_entities() {
    let store = InMemoryEvaluationStore::new();
    store
        .upsert_dataset(&cmip6_record("tas", "historical", "r1i1p1f1"), &[], now())
        .unwrap();
    let options = SolveOptions {
        dry_run: true,
        ..SolveOptions::default()
    };
    let outcome = solve(&store, &[grouping_diagnostic()], &options, now()).unwrap();
    assert!(outcome.new_executions.is_empty());
    assert!(store.list_groups(&climate_eval_core::GroupFilter::default()).unwrap().is_empty());
}

#[test]
fn provider_filter_restricts_solving() {
    let store = InMemoryEvaluationStore::new();
    store
        .upsert_dataset(&cmip6_record("tas", "historical", "r1i1p1f1"), &[], now())
        .unwrap();
    let options = SolveOptions {
        filter: climate_eval_core::GroupFilter {
            provider: Some("other".to_string()),
            diagnostic: None,
            dirty_only: false,
        },
        ..SolveOptions::default()
    };
    let outcome = solve(&store, &[grouping_diagnostic()], &options, now()).unwrap();
    assert_eq!(outcome.diagnostics_solved, 0);
    assert!(outcome.new_executions.is_empty());
}

#[test]
fn file_time_ranges_parse_into_half_open_intervals() {
    let range = TimeRange::from_months(1850, 1, 2014, 12).unwrap();
    let file = file_for("x", Some(range));
    assert_eq!(file.time_range.unwrap(), range);
}
