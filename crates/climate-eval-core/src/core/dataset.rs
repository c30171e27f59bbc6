// crates/climate-eval-core/src/core/dataset.rs
// ============================================================================
// Module: Climate Eval Dataset Model
// Description: Dataset and file records of the dataset catalog.
// Purpose: Model ingested datasets with facet metadata and version lifecycle.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A dataset is a versioned group of files sharing one instance identifier.
//! Facets are stored as an ordered string map, not as per-source-type columns,
//! so a new source type never changes the data model. Dataset rows are
//! immutable: a newer version is a new row that supersedes the prior as the
//! active version, while the prior row is retained for audit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DatasetId;
use crate::core::identifiers::DatasetVersion;
use crate::core::identifiers::FileId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::SourceType;
use crate::core::time::TimeRange;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Facets
// ============================================================================

/// Ordered facet map attached to a dataset.
///
/// Keys are facet names (e.g. `source_id`), values are the facet values.
pub type FacetMap = BTreeMap<String, String>;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Metadata record of one dataset version, as produced by ingestion.
///
/// # Invariants
/// - `(source_type, instance_id, version)` identifies exactly one row.
/// - Records are immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Source type selecting the catalog view.
    pub source_type: SourceType,
    /// Stable content-derived identifier, version independent.
    pub instance_id: InstanceId,
    /// Version of this dataset row.
    pub version: DatasetVersion,
    /// Source-type-specific facet values.
    pub facets: FacetMap,
}

/// Metadata record of one file belonging to a dataset.
///
/// # Invariants
/// - `path` is absolute and unique across the catalog.
/// - A file belongs to exactly one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute filesystem path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
    /// Variable contained in the file, when the source type tracks one.
    pub variable_id: Option<String>,
    /// Half-open time interval covered by the file, when present.
    pub time_range: Option<TimeRange>,
}

// ============================================================================
// SECTION: Stored Rows
// ============================================================================

/// A dataset row as returned by the store, with its surrogate key.
///
/// # Invariants
/// - At most one row per `(source_type, instance_id)` is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDataset {
    /// Surrogate row key.
    pub id: DatasetId,
    /// Dataset metadata record.
    pub record: DatasetRecord,
    /// Whether this row is the active version of its instance.
    pub active: bool,
    /// Whether this row has been soft-deleted.
    pub retracted: bool,
    /// Ingestion timestamp.
    pub ingested_at: Timestamp,
}

/// A file row as returned by the store, with its surrogate key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Surrogate row key.
    pub id: FileId,
    /// Owning dataset row key.
    pub dataset_id: DatasetId,
    /// File metadata record.
    pub record: FileRecord,
}

/// An active dataset together with its files, as consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDataset {
    /// Dataset row.
    pub dataset: StoredDataset,
    /// Files belonging to the dataset row.
    pub files: Vec<StoredFile>,
}

impl ResolvedDataset {
    /// Returns the facet value for `name`, checking the facet map first and
    /// falling back to the identity columns (`instance_id`, `version`,
    /// `source_type`).
    #[must_use]
    pub fn facet(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.dataset.record.facets.get(name) {
            return Some(value.as_str());
        }
        match name {
            "instance_id" => Some(self.dataset.record.instance_id.as_str()),
            "version" => Some(self.dataset.record.version.as_str()),
            "source_type" => Some(self.dataset.record.source_type.as_str()),
            _ => None,
        }
    }

    /// Returns the time ranges of all files that carry one.
    #[must_use]
    pub fn file_time_ranges(&self) -> Vec<TimeRange> {
        self.files.iter().filter_map(|file| file.record.time_range).collect()
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

    fn sample() -> ResolvedDataset {
        let mut facets = FacetMap::new();
        facets.insert("source_id".to_string(), "ACCESS-ESM1-5".to_string());
        ResolvedDataset {
            dataset: StoredDataset {
                id: DatasetId::from_raw(1).unwrap(),
                record: DatasetRecord {
                    source_type: SourceType::cmip6(),
                    instance_id: InstanceId::new("CMIP6.tas.r1i1p1f1"),
                    version: DatasetVersion::new("v20210101"),
                    facets,
                },
                active: true,
                retracted: false,
                ingested_at: Timestamp::from_unix_seconds(0),
            },
            files: Vec::new(),
        }
    }

    #[test]
    fn facet_lookup_prefers_facet_map() {
        let resolved = sample();
        assert_eq!(resolved.facet("source_id"), Some("ACCESS-ESM1-5"));
    }

    #[test]
    fn facet_lookup_falls_back_to_identity_columns() {
        let resolved = sample();
        assert_eq!(resolved.facet("instance_id"), Some("CMIP6.tas.r1i1p1f1"));
        assert_eq!(resolved.facet("version"), Some("v20210101"));
        assert_eq!(resolved.facet("source_type"), Some("cmip6"));
        assert_eq!(resolved.facet("missing"), None);
    }
}
