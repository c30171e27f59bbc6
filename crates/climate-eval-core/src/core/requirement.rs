// crates/climate-eval-core/src/core/requirement.rs
// ============================================================================
// Module: Climate Eval Data Requirements
// Description: Declarative dataset requirements attached to diagnostics.
// Purpose: Model filters, grouping, and group constraints with stable identity.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A diagnostic declares one [`DataRequirement`] per source type it consumes.
//! Each requirement filters a catalog view, partitions the surviving rows by
//! facet tuple, and post-processes the groups through an ordered list of
//! [`GroupConstraint`]s. Group identity is a [`GroupKey`]: the union of
//! `group_by` facets across requirements, sorted alphabetically by facet name
//! with stable value tie-breaking, so identical inputs always produce
//! bit-identical identifiers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::SourceType;

// ============================================================================
// SECTION: Filters
// ============================================================================

/// Facet value matcher: a single value or any of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FacetMatch {
    /// Matches exactly one value.
    Single(String),
    /// Matches any listed value.
    AnyOf(Vec<String>),
}

impl FacetMatch {
    /// Returns true when the facet value satisfies this matcher.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Single(expected) => expected == value,
            Self::AnyOf(options) => options.iter().any(|option| option == value),
        }
    }
}

impl From<&str> for FacetMatch {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

/// One filter clause over a catalog view.
///
/// # Invariants
/// - `keep = true` clauses are conjunctive: a row must satisfy all of them.
/// - `keep = false` clauses exclude a row only when *all* listed facets match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetFilter {
    /// Facet name to matcher mapping.
    pub facets: BTreeMap<String, FacetMatch>,
    /// Whether matching rows are kept (`true`) or excluded (`false`).
    pub keep: bool,
}

impl FacetFilter {
    /// Builds a keep filter from facet/matcher pairs.
    #[must_use]
    pub fn keep(facets: impl IntoIterator<Item = (&'static str, FacetMatch)>) -> Self {
        Self {
            facets: facets.into_iter().map(|(name, matcher)| (name.to_string(), matcher)).collect(),
            keep: true,
        }
    }

    /// Builds an exclude filter from facet/matcher pairs.
    #[must_use]
    pub fn exclude(facets: impl IntoIterator<Item = (&'static str, FacetMatch)>) -> Self {
        Self {
            facets: facets.into_iter().map(|(name, matcher)| (name.to_string(), matcher)).collect(),
            keep: false,
        }
    }

    /// Returns true when every listed facet of the row matches this clause.
    ///
    /// Rows lacking a listed facet never match.
    #[must_use]
    pub fn matches(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        self.facets.iter().all(|(name, matcher)| {
            lookup(name).is_some_and(|value| matcher.matches(value.as_str()))
        })
    }
}

// ============================================================================
// SECTION: Group Constraints
// ============================================================================

/// Post-grouping predicate or augmentation applied to each candidate group.
///
/// # Invariants
/// - Constraints are applied in declared order.
/// - A constraint either transforms the group or drops it; drops are logged,
///   never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupConstraint {
    /// Attach the single dataset matching a template to each group; groups
    /// with no match are dropped.
    AddSupplementaryDataset {
        /// Template facets the supplementary dataset must match.
        template: BTreeMap<String, FacetMatch>,
        /// Facet names whose values must equal the group's values
        /// (e.g. `source_id`).
        matching_facets: Vec<String>,
    },
    /// Within each sub-group, the union of file time ranges must cover the
    /// min-to-max span with no gap; failing groups are dropped.
    RequireContiguousTimerange {
        /// Facet names defining the sub-grouping (e.g. `instance_id`).
        group_by: Vec<String>,
    },
    /// Time ranges across the sub-groups must share a non-empty
    /// intersection; failing groups are dropped.
    RequireOverlappingTimerange {
        /// Facet names defining the sub-grouping.
        group_by: Vec<String>,
    },
    /// Include ancillary datasets matching a template without affecting
    /// grouping; zero matches is not an error.
    SelectSupplementary {
        /// Template facets the ancillary datasets must match.
        template: BTreeMap<String, FacetMatch>,
    },
}

impl GroupConstraint {
    /// Returns a stable label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AddSupplementaryDataset {
                ..
            } => "add_supplementary_dataset",
            Self::RequireContiguousTimerange {
                ..
            } => "require_contiguous_timerange",
            Self::RequireOverlappingTimerange {
                ..
            } => "require_overlapping_timerange",
            Self::SelectSupplementary {
                ..
            } => "select_supplementary",
        }
    }
}

// ============================================================================
// SECTION: Data Requirement
// ============================================================================

/// Declarative dataset requirement of a diagnostic for one source type.
///
/// # Invariants
/// - `group_by` order is declaration order; group identity sorting happens in
///   [`GroupKey`], not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequirement {
    /// Catalog view this requirement selects.
    pub source_type: SourceType,
    /// Filter clauses applied to the view.
    pub filters: Vec<FacetFilter>,
    /// Facet names partitioning the filtered rows into groups.
    pub group_by: Vec<String>,
    /// Post-grouping constraints, applied in order.
    pub constraints: Vec<GroupConstraint>,
}

// ============================================================================
// SECTION: Group Key
// ============================================================================

/// Stable identity of an execution group.
///
/// # Invariants
/// - Pairs are sorted by facet name ascending, ties broken by value
///   ascending; construction enforces the ordering.
/// - The canonical string form is bit-identical across processes for
///   identical inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(Vec<(String, String)>);

impl GroupKey {
    /// Builds a group key from facet/value pairs, sorting into canonical
    /// order and removing exact duplicates.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut pairs: Vec<(String, String)> = pairs.into_iter().collect();
        pairs.sort();
        pairs.dedup();
        Self(pairs)
    }

    /// Returns the ordered facet/value pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Returns the canonical string form, `facet=value` pairs joined by `;`.
    #[must_use]
    pub fn canonical(&self) -> String {
        let parts: Vec<String> =
            self.0.iter().map(|(facet, value)| format!("{facet}={value}")).collect();
        parts.join(";")
    }

    /// Returns a filesystem-safe path component: values joined by `_` with
    /// separator characters replaced.
    #[must_use]
    pub fn path_component(&self) -> String {
        let parts: Vec<String> =
            self.0.iter().map(|(_, value)| sanitize_path_component(value)).collect();
        parts.join("_")
    }

    /// Parses a canonical string form back into a group key.
    #[must_use]
    pub fn from_canonical(canonical: &str) -> Self {
        let pairs = canonical.split(';').filter_map(|part| {
            part.split_once('=').map(|(facet, value)| (facet.to_string(), value.to_string()))
        });
        Self::new(pairs)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.canonical().fmt(f)
    }
}

/// Replaces path separators and whitespace in a group key value.
fn sanitize_path_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch == '/' || ch == '\\' || ch.is_whitespace() {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
