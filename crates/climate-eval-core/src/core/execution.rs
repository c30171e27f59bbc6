// crates/climate-eval-core/src/core/execution.rs
// ============================================================================
// Module: Climate Eval Execution Lifecycle Model
// Description: Execution groups, executions, outputs, and metric values.
// Purpose: Model the execution lifecycle with an explicit status state machine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An execution group is the identity "this diagnostic for this combination
//! of facet values"; an execution is one concrete run of the diagnostic on a
//! specific snapshot of input dataset versions. Status transitions follow a
//! strict state machine: `pending → running → {succeeded, failed, cancelled}`
//! and `failed → pending` only via explicit retry. The store enforces the
//! transitions with compare-and-set updates; this module defines which
//! transitions are legal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DatasetId;
use crate::core::identifiers::DatasetVersion;
use crate::core::identifiers::DiagnosticSlug;
use crate::core::identifiers::ExecutionGroupId;
use crate::core::identifiers::ExecutionId;
use crate::core::identifiers::ProviderSlug;
use crate::core::requirement::GroupKey;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status State Machine
// ============================================================================

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Enqueued and waiting for a worker.
    Pending,
    /// Claimed by a worker and in flight.
    Running,
    /// Terminated successfully with recorded outputs.
    Succeeded,
    /// Terminated with an error recorded on the row.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns the stable wire label of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stable wire label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true when the transition `self → next` is legal.
    ///
    /// Legal transitions: `pending → running`, `pending → cancelled`,
    /// `running → succeeded | failed | cancelled`, `failed → pending`
    /// (explicit retry). Everything else, including `pending → succeeded`,
    /// is rejected.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Returns true when the status is terminal for the current attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// ============================================================================
// SECTION: Execution Group
// ============================================================================

/// Stored execution group row.
///
/// # Invariants
/// - `(diagnostic, group_key)` is unique.
/// - `latest_execution_id` is a forward surrogate edge resolved at read time;
///   there is no back pointer.
/// - A group is `dirty` iff no succeeded execution matches the
///   currently-resolved input dataset set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// Surrogate row key.
    pub id: ExecutionGroupId,
    /// Provider owning the diagnostic.
    pub provider_slug: ProviderSlug,
    /// Diagnostic this group belongs to.
    pub diagnostic_slug: DiagnosticSlug,
    /// Stable group identity.
    pub group_key: GroupKey,
    /// Whether the group needs a new execution.
    pub dirty: bool,
    /// Whether the group's candidate has vanished from the catalog.
    pub stale: bool,
    /// Latest execution surrogate key, when any execution exists.
    pub latest_execution_id: Option<ExecutionId>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Stored execution row.
///
/// # Invariants
/// - `(group, dataset_hash)` is unique.
/// - At most one execution per group is `running` at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Surrogate row key.
    pub id: ExecutionId,
    /// Parent execution group.
    pub group_id: ExecutionGroupId,
    /// Digest of the input dataset version set.
    pub dataset_hash: String,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Wall-clock start, set on `pending → running`.
    pub started_at: Option<Timestamp>,
    /// Wall-clock finish, set on any terminal transition.
    pub finished_at: Option<Timestamp>,
    /// Results-root-relative output directory of this execution.
    pub output_directory: Option<PathBuf>,
    /// Results-root-relative captured log file.
    pub log_path: Option<PathBuf>,
    /// Number of explicit retries so far.
    pub retry_count: u32,
    /// Human-readable failure reason, set on `failed`.
    pub failure_reason: Option<String>,
}

/// Input dataset recorded against an execution, with the version it ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInput {
    /// Execution row key.
    pub execution_id: ExecutionId,
    /// Dataset row key.
    pub dataset_id: DatasetId,
    /// Dataset version at submission time.
    pub version: DatasetVersion,
}

// ============================================================================
// SECTION: Outputs
// ============================================================================

/// Kind of file produced by a successful execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// HTML page.
    Html,
    /// netCDF data file.
    Nc,
    /// CSV table.
    Csv,
    /// PNG image.
    Png,
    /// JSON document.
    Json,
    /// Captured log file.
    Log,
}

impl OutputKind {
    /// Returns the stable wire label of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Nc => "nc",
            Self::Csv => "csv",
            Self::Png => "png",
            Self::Json => "json",
            Self::Log => "log",
        }
    }

    /// Parses a stable wire label back into a kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "html" => Some(Self::Html),
            "nc" => Some(Self::Nc),
            "csv" => Some(Self::Csv),
            "png" => Some(Self::Png),
            "json" => Some(Self::Json),
            "log" => Some(Self::Log),
            _ => None,
        }
    }

    /// Returns the default MIME type for the kind.
    #[must_use]
    pub const fn default_mime(self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Nc => "application/netcdf",
            Self::Csv => "text/csv",
            Self::Png => "image/png",
            Self::Json => "application/json",
            Self::Log => "text/plain",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// One file in an execution's output manifest.
///
/// # Invariants
/// - `relative_path` is relative to the execution's output directory;
///   absolute paths are rejected at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputManifestEntry {
    /// Path relative to the execution output directory.
    pub relative_path: PathBuf,
    /// File kind.
    pub kind: OutputKind,
    /// MIME type.
    pub mime_type: String,
    /// Optional human-readable description.
    pub description: Option<String>,
}

impl OutputManifestEntry {
    /// Creates an entry with the kind's default MIME type.
    #[must_use]
    pub fn new(relative_path: impl Into<PathBuf>, kind: OutputKind) -> Self {
        Self {
            relative_path: relative_path.into(),
            kind,
            mime_type: kind.default_mime().to_string(),
            description: None,
        }
    }
}

/// Stored output row of a successful execution.
///
/// # Invariants
/// - `relative_path` joined with the results root reproduces the absolute
///   path the file was copied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Owning execution row key.
    pub execution_id: ExecutionId,
    /// Manifest entry describing the file.
    pub entry: OutputManifestEntry,
}

// ============================================================================
// SECTION: Metric Values
// ============================================================================

/// Scalar metric value produced by an execution.
///
/// # Invariants
/// - `facets` carries exactly the diagnostic's declared facets; the store
///   validates before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Facet values locating this metric.
    pub facets: BTreeMap<String, String>,
    /// Numeric payload.
    pub value: f64,
}

/// One-dimensional series metric value produced by an execution.
///
/// # Invariants
/// - `index` and `values` have equal lengths.
/// - `facets` carries exactly the diagnostic's declared facets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetricValue {
    /// Facet values locating this series.
    pub facets: BTreeMap<String, String>,
    /// Name of the index dimension (e.g. `time`).
    pub index_name: String,
    /// Index labels.
    pub index: Vec<String>,
    /// Numeric payload aligned with `index`.
    pub values: Vec<f64>,
}

impl SeriesMetricValue {
    /// Returns true when index and values are aligned.
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.index.len() == self.values.len()
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

    use super::*;

    #[test]
    fn legal_transitions_follow_state_machine() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        use ExecutionStatus::*;
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("unknown"), None);
    }

    #[test]
    fn output_kind_labels_round_trip() {
        for kind in [
            OutputKind::Html,
            OutputKind::Nc,
            OutputKind::Csv,
            OutputKind::Png,
            OutputKind::Json,
            OutputKind::Log,
        ] {
            assert_eq!(OutputKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn series_alignment_is_checked() {
        let series = SeriesMetricValue {
            facets: BTreeMap::new(),
            index_name: "time".to_string(),
            index: vec!["1850".to_string(), "1851".to_string()],
            values: vec![0.5],
        };
        assert!(!series.is_aligned());
    }
}
