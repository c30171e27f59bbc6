// crates/climate-eval-executor/src/runner.rs
// ============================================================================
// Module: Execution Runner
// Description: Shared per-execution lifecycle shared by all executor variants.
// Purpose: Claim, stage, invoke, record, and finalize one execution.
// Dependencies: climate-eval-core, tracing
// ============================================================================

//! ## Overview
//! Every executor variant funnels through the same runner: claim the pending
//! execution with a compare-and-set, materialize exclusive scratch and output
//! directories, invoke the provider's diagnostic as an opaque unit, validate
//! and record the CMEC bundles, and transition the execution to its terminal
//! status. A failing execution never propagates an error out of the runner;
//! the failure is written to the execution row with a human-readable reason.
//! Scratch directories are deleted on success and optionally retained on
//! failure for debugging. Partial outputs of a cancelled execution are
//! discarded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use climate_eval_core::DiagnosticLookup;
use climate_eval_core::EvaluationStore;
use climate_eval_core::Execution;
use climate_eval_core::ExecutionDefinition;
use climate_eval_core::ExecutionGroup;
use climate_eval_core::ExecutionId;
use climate_eval_core::ExecutionResult;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::METRIC_BUNDLE_FILENAME;
use climate_eval_core::OUTPUT_BUNDLE_FILENAME;
use climate_eval_core::OutputBundle;
use climate_eval_core::OutputKind;
use climate_eval_core::OutputManifestEntry;
use climate_eval_core::ResolvedDataset;
use climate_eval_core::SourceType;
use climate_eval_core::StoreError;
use climate_eval_core::Timestamp;
use tracing::debug;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between executors and runners.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Set once cancellation is requested.
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Runner Config
// ============================================================================

/// Filesystem configuration shared by all executor variants.
///
/// # Invariants
/// - Both roots are absolute; each execution owns a unique subtree of each.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root under which per-execution scratch directories are created.
    pub scratch_root: PathBuf,
    /// Keep the scratch directory of failed executions for debugging.
    pub retain_scratch_on_failure: bool,
}

impl RunnerConfig {
    /// Creates a config that deletes scratch on every terminal state.
    #[must_use]
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            retain_scratch_on_failure: false,
        }
    }
}

// ============================================================================
// SECTION: Run Outcome
// ============================================================================

/// Terminal outcome of one runner invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The execution succeeded and its results were recorded.
    Succeeded,
    /// The execution failed; the reason is on the row.
    Failed,
    /// The execution was cancelled before completion.
    Cancelled,
    /// Another worker claimed the execution first.
    AlreadyClaimed,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Shared per-execution lifecycle driver.
pub struct ExecutionRunner {
    /// Store recording lifecycle and results.
    store: Arc<dyn EvaluationStore>,
    /// Registry resolving diagnostics by slug.
    registry: Arc<dyn DiagnosticLookup>,
    /// Filesystem configuration.
    config: RunnerConfig,
}

impl ExecutionRunner {
    /// Creates a runner over the given store and registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        registry: Arc<dyn DiagnosticLookup>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EvaluationStore> {
        &self.store
    }

    /// Runs one pending execution to a terminal state.
    ///
    /// Infrastructure failures (store unavailable) surface as errors;
    /// everything that is the execution's own fault is recorded on the row
    /// and reported through [`RunOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only for infrastructure-level store failures.
    pub fn run(
        &self,
        execution_id: ExecutionId,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, StoreError> {
        // Claim with compare-and-set; losing the race is not an error.
        match self.store.transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            Timestamp::now(),
            None,
        ) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Ok(RunOutcome::AlreadyClaimed),
            Err(err) => return Err(err),
        }

        let (definition, group) = match self.build_definition(execution_id) {
            Ok(parts) => parts,
            Err(err) => {
                self.fail(execution_id, &format!("failed to stage execution: {err}"))?;
                return Ok(RunOutcome::Failed);
            }
        };
        debug!(
            execution = %execution_id,
            group = %group.group_key,
            "staged execution definition"
        );

        if cancel.is_cancelled() {
            self.cancel_claimed(execution_id, &definition)?;
            return Ok(RunOutcome::Cancelled);
        }

        let outcome = self.execute_and_record(&definition, &group, cancel)?;
        self.cleanup_scratch(&definition, outcome);
        Ok(outcome)
    }

    /// Invokes the diagnostic and records its results.
    fn execute_and_record(
        &self,
        definition: &ExecutionDefinition,
        group: &ExecutionGroup,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, StoreError> {
        let Some(diagnostic) =
            self.registry.diagnostic(&definition.provider_slug, &definition.diagnostic_slug)
        else {
            self.fail(
                definition.execution_id,
                &format!(
                    "diagnostic not registered: {}/{}",
                    definition.provider_slug, definition.diagnostic_slug
                ),
            )?;
            return Ok(RunOutcome::Failed);
        };

        self.store.record_heartbeat(definition.execution_id, Timestamp::now())?;
        if let Err(err) = diagnostic.execute(definition) {
            self.fail(definition.execution_id, &err.to_string())?;
            return Ok(RunOutcome::Failed);
        }
        if cancel.is_cancelled() {
            self.cancel_claimed(definition.execution_id, definition)?;
            return Ok(RunOutcome::Cancelled);
        }

        let result = match diagnostic.build_execution_result(definition) {
            Ok(result) => result,
            Err(err) => {
                self.fail(definition.execution_id, &err.to_string())?;
                return Ok(RunOutcome::Failed);
            }
        };

        match self.record_result(definition, &result, &diagnostic.facets()) {
            Ok(()) => {}
            // Infrastructure failure while recording is not the execution's
            // fault; surface it.
            Err(err @ (StoreError::Io(_) | StoreError::Db(_))) => return Err(err),
            Err(err) => {
                self.fail(definition.execution_id, &format!("invalid result bundle: {err}"))?;
                return Ok(RunOutcome::Failed);
            }
        }

        self.store.transition_execution(
            definition.execution_id,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            Timestamp::now(),
            None,
        )?;
        self.store.set_group_clean(group.id)?;
        info!(execution = %definition.execution_id, group = %group.group_key, "execution succeeded");
        Ok(RunOutcome::Succeeded)
    }

    /// Validates bundles, writes them to the output directory, and records
    /// outputs and metric values.
    fn record_result(
        &self,
        definition: &ExecutionDefinition,
        result: &ExecutionResult,
        declared_facets: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        result.output_bundle.validate()?;
        result.metric_bundle.validate(declared_facets)?;

        let output_json = result.output_bundle.to_json()?;
        fs::write(definition.output_directory.join(OUTPUT_BUNDLE_FILENAME), output_json)
            .map_err(|err| StoreError::Io(err.to_string()))?;
        let metric_json = result.metric_bundle.to_json()?;
        fs::write(definition.output_directory.join(METRIC_BUNDLE_FILENAME), metric_json)
            .map_err(|err| StoreError::Io(err.to_string()))?;

        let manifest = build_manifest(&result.output_bundle, &definition.log_path);
        self.store.record_outputs(
            definition.execution_id,
            &definition.output_directory,
            &manifest,
        )?;
        let values = result.metric_bundle.scalar_values()?;
        self.store.record_metric_values(definition.execution_id, declared_facets, &values)?;
        Ok(())
    }

    /// Builds the execution definition from stored rows.
    fn build_definition(
        &self,
        execution_id: ExecutionId,
    ) -> Result<(ExecutionDefinition, ExecutionGroup), StoreError> {
        let execution: Execution = self.store.execution(execution_id)?;
        let group = self.store.group(execution.group_id)?;

        let mut datasets_by_source_type: BTreeMap<SourceType, Vec<ResolvedDataset>> =
            BTreeMap::new();
        for input in self.store.execution_inputs(execution_id)? {
            let resolved = self.store.dataset_with_files(input.dataset_id)?;
            datasets_by_source_type
                .entry(resolved.dataset.record.source_type.clone())
                .or_default()
                .push(resolved);
        }

        let scratch_directory = self.config.scratch_root.join(format!("exec-{execution_id}"));
        let output_directory = scratch_directory.join("output");
        fs::create_dir_all(&output_directory).map_err(|err| StoreError::Io(err.to_string()))?;
        // The log lives inside the output directory so it is captured into
        // the results tree with the rest of the manifest.
        let log_path = output_directory.join("out.log");
        if !log_path.exists() {
            fs::write(&log_path, b"").map_err(|err| StoreError::Io(err.to_string()))?;
        }

        Ok((
            ExecutionDefinition {
                execution_id,
                group_id: group.id,
                provider_slug: group.provider_slug.clone(),
                diagnostic_slug: group.diagnostic_slug.clone(),
                group_key: group.group_key.clone(),
                datasets_by_source_type,
                output_directory,
                scratch_directory,
                log_path,
            },
            group,
        ))
    }

    /// Marks a claimed execution failed with a reason.
    fn fail(&self, execution_id: ExecutionId, reason: &str) -> Result<(), StoreError> {
        warn!(execution = %execution_id, reason, "execution failed");
        self.store.transition_execution(
            execution_id,
            ExecutionStatus::Running,
            ExecutionStatus::Failed,
            Timestamp::now(),
            Some(reason),
        )
    }

    /// Cancels a claimed execution, discarding partial outputs.
    fn cancel_claimed(
        &self,
        execution_id: ExecutionId,
        definition: &ExecutionDefinition,
    ) -> Result<(), StoreError> {
        self.store.transition_execution(
            execution_id,
            ExecutionStatus::Running,
            ExecutionStatus::Cancelled,
            Timestamp::now(),
            None,
        )?;
        if let Err(err) = fs::remove_dir_all(&definition.scratch_directory) {
            warn!(
                scratch = %definition.scratch_directory.display(),
                error = %err,
                "failed to discard partial outputs"
            );
        }
        Ok(())
    }

    /// Deletes or retains the scratch subtree based on the outcome.
    fn cleanup_scratch(&self, definition: &ExecutionDefinition, outcome: RunOutcome) {
        let retain = outcome == RunOutcome::Failed && self.config.retain_scratch_on_failure;
        if retain || outcome == RunOutcome::Cancelled {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&definition.scratch_directory) {
            warn!(
                scratch = %definition.scratch_directory.display(),
                error = %err,
                "failed to remove scratch directory"
            );
        }
    }
}

// ============================================================================
// SECTION: Manifest Building
// ============================================================================

/// Builds the output manifest from a CMEC output bundle plus the log file.
#[must_use]
pub fn build_manifest(bundle: &OutputBundle, log_path: &Path) -> Vec<OutputManifestEntry> {
    let mut manifest = vec![
        OutputManifestEntry::new(OUTPUT_BUNDLE_FILENAME, OutputKind::Json),
        OutputManifestEntry::new(METRIC_BUNDLE_FILENAME, OutputKind::Json),
    ];
    if let Some(index) = &bundle.index {
        manifest.push(OutputManifestEntry::new(index.clone(), OutputKind::Html));
    }
    for (section, kind_hint) in [
        (&bundle.data, None),
        (&bundle.plots, Some(OutputKind::Png)),
        (&bundle.html, Some(OutputKind::Html)),
        (&bundle.metrics, Some(OutputKind::Json)),
    ] {
        for reference in section.values() {
            let kind = infer_kind(&reference.filename).or(kind_hint).unwrap_or(OutputKind::Json);
            let mut entry = OutputManifestEntry::new(reference.filename.clone(), kind);
            entry.description = reference.description.clone();
            manifest.push(entry);
        }
    }
    if log_path.exists()
        && let Some(name) = log_path.file_name().and_then(|name| name.to_str())
    {
        manifest.push(OutputManifestEntry::new(name, OutputKind::Log));
    }
    manifest
}

/// Infers the output kind from a filename extension.
fn infer_kind(filename: &str) -> Option<OutputKind> {
    let extension = Path::new(filename).extension()?.to_str()?;
    match extension {
        "html" => Some(OutputKind::Html),
        "nc" => Some(OutputKind::Nc),
        "csv" => Some(OutputKind::Csv),
        "png" => Some(OutputKind::Png),
        "json" => Some(OutputKind::Json),
        "log" => Some(OutputKind::Log),
        _ => None,
    }
}

// ============================================================================
// SECTION: Lost Worker Recovery
// ============================================================================

/// Fails running executions whose heartbeat went stale, on startup or
/// between passes.
///
/// # Errors
///
/// Returns [`StoreError`] on backend failure.
pub fn recover_lost_workers(
    store: &dyn EvaluationStore,
    heartbeat_timeout: std::time::Duration,
    now: Timestamp,
) -> Result<Vec<ExecutionId>, StoreError> {
    let stale_before = Timestamp::from_unix_seconds(
        now.unix_seconds()
            .saturating_sub(i64::try_from(heartbeat_timeout.as_secs()).unwrap_or(i64::MAX)),
    );
    let recovered = store.recover_lost_executions(stale_before, "lost worker", now)?;
    for execution_id in &recovered {
        warn!(execution = %execution_id, "recovered lost worker");
    }
    Ok(recovered)
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

    use super::*;

    #[test]
    fn manifest_includes_bundles_index_and_sections() {
        let bundle = OutputBundle {
            index: Some("index.html".to_string()),
            plots: [(
                "bias".to_string(),
                climate_eval_core::OutputFileReference::new("plots/bias.png"),
            )]
            .into_iter()
            .collect(),
            data: [(
                "series".to_string(),
                climate_eval_core::OutputFileReference::new("data/series.nc"),
            )]
            .into_iter()
            .collect(),
            ..OutputBundle::default()
        };
        let manifest = build_manifest(&bundle, Path::new("/nonexistent/out.log"));
        let paths: Vec<String> =
            manifest.iter().map(|entry| entry.relative_path.display().to_string()).collect();
        assert!(paths.contains(&"output.json".to_string()));
        assert!(paths.contains(&"diagnostic.json".to_string()));
        assert!(paths.contains(&"index.html".to_string()));
        assert!(paths.contains(&"plots/bias.png".to_string()));
        assert!(paths.contains(&"data/series.nc".to_string()));
    }

    #[test]
    fn kinds_are_inferred_from_extensions() {
        assert_eq!(infer_kind("a/b.nc"), Some(OutputKind::Nc));
        assert_eq!(infer_kind("plot.png"), Some(OutputKind::Png));
        assert_eq!(infer_kind("page.html"), Some(OutputKind::Html));
        assert_eq!(infer_kind("table.csv"), Some(OutputKind::Csv));
        assert_eq!(infer_kind("noext"), None);
    }

    #[test]
    fn cancellation_token_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }
}
