// crates/climate-eval-core/src/core/diagnostic.rs
// ============================================================================
// Module: Climate Eval Diagnostic Model
// Description: Diagnostic metadata and execution definitions.
// Purpose: Describe registered diagnostics and the inputs handed to them.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Diagnostic code lives in provider plugins; the core stores metadata only.
//! A [`DiagnosticSummary`] names a diagnostic, its data requirements, and the
//! facets its metric values carry. An [`ExecutionDefinition`] is the full
//! input handed to a diagnostic at run time: resolved datasets per source
//! type plus the output, scratch, and log locations owned by the execution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::core::cmec::MetricBundle;
use crate::core::cmec::OutputBundle;
use crate::core::dataset::ResolvedDataset;
use crate::core::identifiers::DiagnosticSlug;
use crate::core::identifiers::ExecutionGroupId;
use crate::core::identifiers::ExecutionId;
use crate::core::identifiers::ProviderSlug;
use crate::core::identifiers::SourceType;
use crate::core::requirement::DataRequirement;
use crate::core::requirement::GroupKey;

// ============================================================================
// SECTION: Diagnostic Metadata
// ============================================================================

/// Metadata describing one registered diagnostic.
///
/// # Invariants
/// - `(provider_slug, diagnostic_slug)` is unique within the registry.
/// - `data_requirements` keeps declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// Provider owning the diagnostic.
    pub provider_slug: ProviderSlug,
    /// Diagnostic slug within the provider.
    pub diagnostic_slug: DiagnosticSlug,
    /// Ordered dataset requirements, one per consumed source type.
    pub data_requirements: Vec<DataRequirement>,
    /// Facet names this diagnostic emits on metric values.
    pub facets: BTreeSet<String>,
}

// ============================================================================
// SECTION: Execution Definition
// ============================================================================

/// Complete input handed to a diagnostic for one execution.
///
/// # Invariants
/// - `output_directory` and `scratch_directory` are absolute and owned
///   exclusively by this execution.
/// - Dataset lists are snapshots; diagnostics must not mutate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDefinition {
    /// Execution row key.
    pub execution_id: ExecutionId,
    /// Parent group row key.
    pub group_id: ExecutionGroupId,
    /// Provider owning the diagnostic.
    pub provider_slug: ProviderSlug,
    /// Diagnostic to run.
    pub diagnostic_slug: DiagnosticSlug,
    /// Stable group identity.
    pub group_key: GroupKey,
    /// Resolved input datasets keyed by source type.
    pub datasets_by_source_type: BTreeMap<SourceType, Vec<ResolvedDataset>>,
    /// Absolute directory the diagnostic writes results into.
    pub output_directory: PathBuf,
    /// Absolute exclusive scratch directory.
    pub scratch_directory: PathBuf,
    /// Absolute path of the captured log file.
    pub log_path: PathBuf,
}

impl ExecutionDefinition {
    /// Returns all input file paths across source types, for staging.
    #[must_use]
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.datasets_by_source_type
            .values()
            .flatten()
            .flat_map(|resolved| resolved.files.iter().map(|file| file.record.path.clone()))
            .collect()
    }
}

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// Result pair yielded by a diagnostic after `execute` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// CMEC output bundle indexing produced files.
    pub output_bundle: OutputBundle,
    /// CMEC metric bundle with dimensioned numeric results.
    pub metric_bundle: MetricBundle,
}
