// crates/climate-eval-core/src/solver/resolver.rs
// ============================================================================
// Module: Climate Eval Requirement Resolver
// Description: Expansion of data requirements into execution candidates.
// Purpose: Apply filters, grouping, and constraints to the dataset catalog.
// Dependencies: crate::core, crate::interfaces, tracing
// ============================================================================

//! ## Overview
//! The resolver turns a diagnostic's declared [`DataRequirement`]s into
//! concrete [`ExecutionCandidate`]s against the current catalog. Each
//! requirement independently filters and groups one source-type view and runs
//! its constraints in declared order; the Cartesian product across
//! requirements forms the candidate set. Dropped groups are logged at info
//! level and are never errors. Candidate ordering and group keys are fully
//! deterministic for a given catalog state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;
use tracing::info;

use crate::core::dataset::ResolvedDataset;
use crate::core::diagnostic::DiagnosticSummary;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::SourceType;
use crate::core::requirement::DataRequirement;
use crate::core::requirement::FacetFilter;
use crate::core::requirement::FacetMatch;
use crate::core::requirement::GroupConstraint;
use crate::core::requirement::GroupKey;
use crate::core::time::TimeRange;
use crate::core::time::common_overlap;
use crate::core::time::covers_span_contiguously;
use crate::core::time::overall_span;
use crate::interfaces::EvaluationStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Candidate Types
// ============================================================================

/// One resolved execution candidate for a diagnostic.
///
/// # Invariants
/// - `group_key` is canonical (sorted, deduplicated).
/// - Dataset lists are deduplicated by row key and sorted for determinism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCandidate {
    /// Stable identity of the candidate's execution group.
    pub group_key: GroupKey,
    /// Input datasets keyed by source type.
    pub datasets_by_source_type: BTreeMap<SourceType, Vec<ResolvedDataset>>,
}

impl ExecutionCandidate {
    /// Iterates all input datasets across source types.
    pub fn datasets(&self) -> impl Iterator<Item = &ResolvedDataset> {
        self.datasets_by_source_type.values().flatten()
    }
}

/// One group produced by a single requirement, before the cross-requirement
/// product.
#[derive(Debug, Clone)]
struct RequirementGroup {
    /// Values of the requirement's `group_by` facets.
    key_facets: BTreeMap<String, String>,
    /// Member datasets, including attached supplementaries.
    datasets: Vec<ResolvedDataset>,
}

impl RequirementGroup {
    /// Returns the group's value for a facet, consulting the key first and
    /// falling back to the first member carrying the facet.
    fn facet(&self, name: &str) -> Option<String> {
        if let Some(value) = self.key_facets.get(name) {
            return Some(value.clone());
        }
        self.datasets.iter().find_map(|dataset| dataset.facet(name).map(ToString::to_string))
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves a diagnostic's requirements into execution candidates.
///
/// # Errors
///
/// Returns [`StoreError`] when the catalog cannot be read; constraint drops
/// are logged, never errors.
pub fn resolve_diagnostic(
    store: &dyn EvaluationStore,
    diagnostic: &DiagnosticSummary,
) -> Result<Vec<ExecutionCandidate>, StoreError> {
    let mut per_requirement: Vec<Vec<RequirementGroup>> = Vec::new();
    let mut source_types: Vec<SourceType> = Vec::new();
    for requirement in &diagnostic.data_requirements {
        let view = store.active_datasets(&requirement.source_type)?;
        let groups = resolve_requirement(requirement, &view, diagnostic);
        source_types.push(requirement.source_type.clone());
        per_requirement.push(groups);
    }

    let mut candidates: Vec<ExecutionCandidate> = Vec::new();
    let mut assembly: Vec<(usize, usize)> = Vec::new();
    cartesian_product(&per_requirement, 0, &mut assembly, &mut |combination| {
        candidates.push(assemble_candidate(&source_types, &per_requirement, combination));
    });
    candidates.sort_by(|a, b| a.group_key.cmp(&b.group_key));
    Ok(candidates)
}

/// Resolves one requirement: filter, group, constrain.
fn resolve_requirement(
    requirement: &DataRequirement,
    view: &[ResolvedDataset],
    diagnostic: &DiagnosticSummary,
) -> Vec<RequirementGroup> {
    let filtered: Vec<ResolvedDataset> = view
        .iter()
        .filter(|dataset| passes_filters(&requirement.filters, dataset))
        .cloned()
        .collect();

    let mut partitions: BTreeMap<BTreeMap<String, String>, Vec<ResolvedDataset>> = BTreeMap::new();
    for dataset in filtered {
        let Some(key_facets) = group_facets(&requirement.group_by, &dataset) else {
            debug!(
                diagnostic = %diagnostic.diagnostic_slug,
                instance_id = %dataset.dataset.record.instance_id,
                "dataset lacks a group_by facet; skipped"
            );
            continue;
        };
        partitions.entry(key_facets).or_default().push(dataset);
    }

    let mut groups: Vec<RequirementGroup> = partitions
        .into_iter()
        .map(|(key_facets, datasets)| RequirementGroup {
            key_facets,
            datasets,
        })
        .collect();

    for constraint in &requirement.constraints {
        groups = groups
            .into_iter()
            .filter_map(|group| apply_constraint(constraint, group, view, diagnostic))
            .collect();
    }
    groups
}

/// Returns true when a dataset satisfies every keep filter and no exclude
/// filter.
fn passes_filters(filters: &[FacetFilter], dataset: &ResolvedDataset) -> bool {
    let lookup = |name: &str| dataset.facet(name).map(ToString::to_string);
    filters.iter().all(|filter| {
        if filter.keep {
            filter.matches(lookup)
        } else {
            !filter.matches(lookup)
        }
    })
}

/// Extracts the `group_by` facet values of a dataset, or `None` when any
/// facet is missing.
fn group_facets(
    group_by: &[String],
    dataset: &ResolvedDataset,
) -> Option<BTreeMap<String, String>> {
    let mut facets = BTreeMap::new();
    for name in group_by {
        let value = dataset.facet(name)?;
        facets.insert(name.clone(), value.to_string());
    }
    Some(facets)
}

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// Applies one constraint, returning the transformed group or `None` when it
/// is dropped.
fn apply_constraint(
    constraint: &GroupConstraint,
    group: RequirementGroup,
    view: &[ResolvedDataset],
    diagnostic: &DiagnosticSummary,
) -> Option<RequirementGroup> {
    match constraint {
        GroupConstraint::AddSupplementaryDataset {
            template,
            matching_facets,
        } => add_supplementary(group, template, matching_facets, view, diagnostic),
        GroupConstraint::RequireContiguousTimerange {
            group_by,
        } => require_contiguous(group, group_by, diagnostic),
        GroupConstraint::RequireOverlappingTimerange {
            group_by,
        } => require_overlapping(group, group_by, diagnostic),
        GroupConstraint::SelectSupplementary {
            template,
        } => Some(select_supplementary(group, template, view)),
    }
}

/// Attaches the single dataset matching the template, or drops the group.
fn add_supplementary(
    mut group: RequirementGroup,
    template: &BTreeMap<String, FacetMatch>,
    matching_facets: &[String],
    view: &[ResolvedDataset],
    diagnostic: &DiagnosticSummary,
) -> Option<RequirementGroup> {
    let mut matches: Vec<&ResolvedDataset> = view
        .iter()
        .filter(|dataset| matches_template(dataset, template))
        .filter(|dataset| {
            matching_facets.iter().all(|facet| {
                match (group.facet(facet), dataset.facet(facet)) {
                    (Some(group_value), Some(dataset_value)) => group_value == dataset_value,
                    _ => false,
                }
            })
        })
        .collect();
    if matches.is_empty() {
        info!(
            diagnostic = %diagnostic.diagnostic_slug,
            group = %GroupKey::new(group.key_facets.clone()),
            "no supplementary dataset matches template; group dropped"
        );
        return None;
    }
    // Deterministic choice among several matches: newest version, then
    // greatest instance id.
    matches.sort_by(|a, b| {
        (&a.dataset.record.version, &a.dataset.record.instance_id)
            .cmp(&(&b.dataset.record.version, &b.dataset.record.instance_id))
    });
    let chosen = (*matches.last()?).clone();
    if matches.len() > 1 {
        debug!(
            diagnostic = %diagnostic.diagnostic_slug,
            chosen = %chosen.dataset.record.instance_id,
            "multiple supplementary candidates; newest version chosen"
        );
    }
    if !group.datasets.iter().any(|existing| existing.dataset.id == chosen.dataset.id) {
        group.datasets.push(chosen);
    }
    Some(group)
}

/// Returns true when a dataset matches every template facet.
fn matches_template(dataset: &ResolvedDataset, template: &BTreeMap<String, FacetMatch>) -> bool {
    template.iter().all(|(name, matcher)| {
        dataset.facet(name).is_some_and(|value| matcher.matches(value))
    })
}

/// Drops the group unless every sub-group's time ranges cover their span
/// contiguously.
fn require_contiguous(
    group: RequirementGroup,
    group_by: &[String],
    diagnostic: &DiagnosticSummary,
) -> Option<RequirementGroup> {
    for (sub_key, ranges) in sub_group_ranges(&group, group_by) {
        if !ranges.is_empty() && !covers_span_contiguously(&ranges) {
            info!(
                diagnostic = %diagnostic.diagnostic_slug,
                sub_group = %sub_key,
                "time ranges have a coverage gap; group dropped"
            );
            return None;
        }
    }
    Some(group)
}

/// Drops the group unless the sub-groups' spans share a non-empty
/// intersection.
fn require_overlapping(
    group: RequirementGroup,
    group_by: &[String],
    diagnostic: &DiagnosticSummary,
) -> Option<RequirementGroup> {
    let spans: Vec<TimeRange> = sub_group_ranges(&group, group_by)
        .into_iter()
        .filter_map(|(_, ranges)| overall_span(&ranges))
        .collect();
    if spans.len() > 1 && common_overlap(&spans).is_none() {
        info!(
            diagnostic = %diagnostic.diagnostic_slug,
            group = %GroupKey::new(group.key_facets.clone()),
            "sub-group time ranges do not overlap; group dropped"
        );
        return None;
    }
    Some(group)
}

/// Partitions the group's files' time ranges by sub-group facet tuple.
fn sub_group_ranges(
    group: &RequirementGroup,
    group_by: &[String],
) -> BTreeMap<String, Vec<TimeRange>> {
    let mut partitions: BTreeMap<String, Vec<TimeRange>> = BTreeMap::new();
    for dataset in &group.datasets {
        let key = group_by
            .iter()
            .map(|facet| dataset.facet(facet).unwrap_or("").to_string())
            .collect::<Vec<String>>()
            .join(";");
        partitions.entry(key).or_default().extend(dataset.file_time_ranges());
    }
    partitions
}

/// Attaches all ancillary datasets matching the template without affecting
/// grouping.
fn select_supplementary(
    mut group: RequirementGroup,
    template: &BTreeMap<String, FacetMatch>,
    view: &[ResolvedDataset],
) -> RequirementGroup {
    let present: BTreeSet<DatasetId> =
        group.datasets.iter().map(|dataset| dataset.dataset.id).collect();
    for dataset in view {
        if matches_template(dataset, template) && !present.contains(&dataset.dataset.id) {
            group.datasets.push(dataset.clone());
        }
    }
    group
}

// ============================================================================
// SECTION: Cross-Requirement Product
// ============================================================================

/// Enumerates the Cartesian product of requirement groups.
fn cartesian_product(
    per_requirement: &[Vec<RequirementGroup>],
    depth: usize,
    assembly: &mut Vec<(usize, usize)>,
    visit: &mut impl FnMut(&[(usize, usize)]),
) {
    if depth == per_requirement.len() {
        if !assembly.is_empty() {
            visit(assembly);
        }
        return;
    }
    for (index, _) in per_requirement[depth].iter().enumerate() {
        assembly.push((depth, index));
        cartesian_product(per_requirement, depth + 1, assembly, visit);
        assembly.pop();
    }
}

/// Builds a candidate from one combination of requirement groups.
fn assemble_candidate(
    source_types: &[SourceType],
    per_requirement: &[Vec<RequirementGroup>],
    combination: &[(usize, usize)],
) -> ExecutionCandidate {
    let mut key_pairs: Vec<(String, String)> = Vec::new();
    let mut datasets_by_source_type: BTreeMap<SourceType, Vec<ResolvedDataset>> = BTreeMap::new();
    for (requirement_index, group_index) in combination {
        let group = &per_requirement[*requirement_index][*group_index];
        for (facet, value) in &group.key_facets {
            key_pairs.push((facet.clone(), value.clone()));
        }
        let bucket =
            datasets_by_source_type.entry(source_types[*requirement_index].clone()).or_default();
        for dataset in &group.datasets {
            if !bucket.iter().any(|existing| existing.dataset.id == dataset.dataset.id) {
                bucket.push(dataset.clone());
            }
        }
    }
    for bucket in datasets_by_source_type.values_mut() {
        bucket.sort_by(|a, b| a.dataset.id.cmp(&b.dataset.id));
    }
    ExecutionCandidate {
        group_key: GroupKey::new(key_pairs),
        datasets_by_source_type,
    }
}
