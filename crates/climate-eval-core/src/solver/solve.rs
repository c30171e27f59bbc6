// crates/climate-eval-core/src/solver/solve.rs
// ============================================================================
// Module: Climate Eval Solver
// Description: Diffing resolved candidates against the execution store.
// Purpose: Emit the minimal set of new executions for the current catalog.
// Dependencies: crate::core, crate::interfaces, crate::solver::resolver, tracing
// ============================================================================

//! ## Overview
//! The solver drives the resolver for every registered diagnostic, computes
//! the stable group key and dataset hash per candidate, and diffs the result
//! against the store. Groups without a succeeded execution matching the
//! currently-resolved dataset set are marked dirty and receive a new pending
//! execution; up-to-date groups are skipped; groups whose candidate vanished
//! are flagged stale, never deleted. Two successive solves with no dataset
//! changes between them produce zero new executions.
//!
//! Solver passes are serialized through a named advisory lease in the store;
//! the store transaction granularity is one group, allowing incremental
//! checkpointing on large catalogs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::diagnostic::DiagnosticSummary;
use crate::core::execution::ExecutionStatus;
use crate::core::hashing::DatasetCoordinate;
use crate::core::hashing::dataset_hash;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::DatasetVersion;
use crate::core::identifiers::ExecutionId;
use crate::core::identifiers::ProviderSlug;
use crate::core::requirement::GroupKey;
use crate::core::time::Timestamp;
use crate::interfaces::EvaluationStore;
use crate::interfaces::GroupFilter;
use crate::interfaces::StoreError;
use crate::solver::resolver::ExecutionCandidate;
use crate::solver::resolver::resolve_diagnostic;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the advisory lease serializing solver passes.
pub const SOLVER_LEASE_NAME: &str = "solver";
/// Default time-to-live of the solver lease.
pub const SOLVER_LEASE_TTL: Duration = Duration::from_secs(3600);

// ============================================================================
// SECTION: Options and Outcome
// ============================================================================

/// Options restricting or shaping a solver pass.
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Provider/diagnostic substring filter, case sensitive.
    pub filter: GroupFilter,
    /// Solve only the first diagnostic of each provider.
    pub one_per_provider: bool,
    /// Resolve and diff without creating executions.
    pub dry_run: bool,
}

/// Summary of one solver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveOutcome {
    /// Newly created pending executions.
    pub new_executions: Vec<ExecutionId>,
    /// Candidates already satisfied by a succeeded execution.
    pub up_to_date: u64,
    /// Candidates whose execution is already enqueued or awaiting retry.
    pub already_tracked: u64,
    /// Groups flagged stale because their candidate vanished.
    pub stale_flagged: u64,
    /// Diagnostics visited by the pass.
    pub diagnostics_solved: u64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Solver pass errors.
///
/// # Invariants
/// - Constraint drops never surface here; they are logged by the resolver.
#[derive(Debug, Error)]
pub enum SolveError {
    /// Another solver holds the advisory lease.
    #[error("solver lease is held by another pass")]
    LeaseHeld,
    /// Store interaction failed.
    #[error("solver store failure: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Lease Guard
// ============================================================================

/// Releases the solver lease on all exit paths.
struct LeaseGuard<'a> {
    /// Store holding the lease row.
    store: &'a dyn EvaluationStore,
    /// Holder identity used at acquisition.
    holder: String,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.store.release_lease(SOLVER_LEASE_NAME, &self.holder) {
            warn!(error = %err, "failed to release solver lease");
        }
    }
}

// ============================================================================
// SECTION: Solve
// ============================================================================

/// Runs one solver pass over the given diagnostics.
///
/// # Errors
///
/// Returns [`SolveError::LeaseHeld`] when another pass is in flight and
/// [`SolveError::Store`] on store failure. Per-candidate work is
/// transactional per group; a pass interrupted by an error keeps all groups
/// it already settled.
pub fn solve(
    store: &dyn EvaluationStore,
    diagnostics: &[DiagnosticSummary],
    options: &SolveOptions,
    now: Timestamp,
) -> Result<SolveOutcome, SolveError> {
    let holder = format!("solver-{}", std::process::id());
    if !store.acquire_lease(SOLVER_LEASE_NAME, &holder, SOLVER_LEASE_TTL, now)? {
        return Err(SolveError::LeaseHeld);
    }
    let _guard = LeaseGuard {
        store,
        holder,
    };

    let mut outcome = SolveOutcome::default();
    let mut seen_providers: BTreeSet<ProviderSlug> = BTreeSet::new();
    for diagnostic in diagnostics {
        if !options.filter.matches(&diagnostic.provider_slug, &diagnostic.diagnostic_slug) {
            continue;
        }
        if options.one_per_provider && !seen_providers.insert(diagnostic.provider_slug.clone()) {
            continue;
        }
        solve_diagnostic(store, diagnostic, options, now, &mut outcome)?;
        outcome.diagnostics_solved += 1;
    }
    Ok(outcome)
}

/// Solves one diagnostic: resolve, diff each candidate, reconcile staleness.
fn solve_diagnostic(
    store: &dyn EvaluationStore,
    diagnostic: &DiagnosticSummary,
    options: &SolveOptions,
    now: Timestamp,
    outcome: &mut SolveOutcome,
) -> Result<(), SolveError> {
    let candidates = resolve_diagnostic(store, diagnostic)?;
    debug!(
        provider = %diagnostic.provider_slug,
        diagnostic = %diagnostic.diagnostic_slug,
        candidates = candidates.len(),
        "resolved execution candidates"
    );

    let live_keys: Vec<GroupKey> =
        candidates.iter().map(|candidate| candidate.group_key.clone()).collect();

    for candidate in &candidates {
        if options.dry_run {
            continue;
        }
        settle_candidate(store, diagnostic, candidate, now, outcome)?;
    }

    if !options.dry_run {
        let flagged = store.reconcile_group_staleness(
            &diagnostic.provider_slug,
            &diagnostic.diagnostic_slug,
            &live_keys,
        )?;
        outcome.stale_flagged += flagged;
    }
    Ok(())
}

/// Settles one candidate inside one store transaction scope.
fn settle_candidate(
    store: &dyn EvaluationStore,
    diagnostic: &DiagnosticSummary,
    candidate: &ExecutionCandidate,
    now: Timestamp,
    outcome: &mut SolveOutcome,
) -> Result<(), SolveError> {
    let coordinates: Vec<DatasetCoordinate> = candidate
        .datasets()
        .map(|resolved| DatasetCoordinate {
            source_type: resolved.dataset.record.source_type.clone(),
            instance_id: resolved.dataset.record.instance_id.clone(),
            version: resolved.dataset.record.version.clone(),
        })
        .collect();
    let hash = dataset_hash(&coordinates);

    let group = store.ensure_group(
        &diagnostic.provider_slug,
        &diagnostic.diagnostic_slug,
        &candidate.group_key,
        now,
    )?;

    match store.find_execution_by_hash(group.id, &hash)? {
        Some(execution) if execution.status == ExecutionStatus::Succeeded => {
            store.set_group_clean(group.id)?;
            outcome.up_to_date += 1;
        }
        Some(execution) => {
            debug!(
                group = %candidate.group_key,
                execution = %execution.id,
                status = %execution.status,
                "execution already tracked for resolved dataset set"
            );
            outcome.already_tracked += 1;
        }
        None => {
            let inputs: Vec<(DatasetId, DatasetVersion)> = candidate
                .datasets()
                .map(|resolved| (resolved.dataset.id, resolved.dataset.record.version.clone()))
                .collect();
            let execution = store.create_execution(group.id, &hash, &inputs, now)?;
            info!(
                provider = %diagnostic.provider_slug,
                diagnostic = %diagnostic.diagnostic_slug,
                group = %candidate.group_key,
                execution = %execution.id,
                "enqueued new execution"
            );
            outcome.new_executions.push(execution.id);
        }
    }
    Ok(())
}
