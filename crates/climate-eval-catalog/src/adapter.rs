// crates/climate-eval-catalog/src/adapter.rs
// ============================================================================
// Module: Dataset Metadata Adapters
// Description: Polymorphic per-source-type metadata extraction.
// Purpose: Keep the rest of the system source-type-agnostic.
// Dependencies: climate-eval-core
// ============================================================================

//! ## Overview
//! An adapter turns one file path into a [`FileMetadata`] record and derives
//! the dataset key (instance id and version) from it. Adding a source type
//! means registering one adapter; nothing else in the system enumerates
//! source types. Adapter failures on a single file flow through the
//! `skip_invalid` channel of ingestion and never fail a whole ingest on
//! their own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use climate_eval_core::DatasetVersion;
use climate_eval_core::FacetMap;
use climate_eval_core::InstanceId;
use climate_eval_core::SourceType;
use climate_eval_core::TimeRange;
use thiserror::Error;

use crate::ingest::IngestOptions;

// ============================================================================
// SECTION: Metadata Record
// ============================================================================

/// Metadata extracted from one dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Instance identifier the file belongs to.
    pub instance_id: InstanceId,
    /// Version of the dataset the file belongs to.
    pub version: DatasetVersion,
    /// Facet values shared by the dataset.
    pub facets: FacetMap,
    /// Variable contained in the file, when tracked.
    pub variable_id: Option<String>,
    /// Half-open time interval covered by the file, when present.
    pub time_range: Option<TimeRange>,
}

/// Dataset key derived from file metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DatasetKey {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Dataset version.
    pub version: DatasetVersion,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Adapter extraction errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The path does not follow the source type's layout.
    #[error("path does not match {source_type} layout: {path} ({reason})")]
    InvalidPath {
        /// Source type whose layout was expected.
        source_type: SourceType,
        /// Offending path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
    /// The file contents could not be read or parsed.
    #[error("failed to read metadata from {path}: {reason}")]
    Unreadable {
        /// Offending path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
}

// ============================================================================
// SECTION: Adapter Contract
// ============================================================================

/// Polymorphic metadata adapter for one source type.
pub trait DatasetAdapter: Send + Sync {
    /// Returns the source type this adapter handles.
    fn source_type(&self) -> SourceType;

    /// Returns the filename glob the source type's files match.
    fn file_pattern(&self) -> &'static str {
        "*.nc"
    }

    /// Extracts a metadata record from one file.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the path or contents are not valid for
    /// this source type.
    fn extract_file_metadata(
        &self,
        path: &Path,
        options: &IngestOptions,
    ) -> Result<FileMetadata, AdapterError>;

    /// Derives the dataset key from an extracted record.
    fn derive_dataset_key(&self, metadata: &FileMetadata) -> DatasetKey {
        DatasetKey {
            instance_id: metadata.instance_id.clone(),
            version: metadata.version.clone(),
        }
    }
}

// ============================================================================
// SECTION: Adapter Registry
// ============================================================================

/// Registry of adapters keyed by source type.
///
/// # Invariants
/// - Source types are unique within the registry; later registrations
///   overwrite earlier ones.
#[derive(Default)]
pub struct AdapterRegistry {
    /// Adapter implementations keyed by source type.
    adapters: BTreeMap<SourceType, Arc<dyn DatasetAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in adapters registered.
    #[must_use]
    pub fn with_builtin_adapters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::cmip6::Cmip6Adapter::new()));
        registry.register(Arc::new(crate::obs4mips::Obs4MipsAdapter::new()));
        registry.register(Arc::new(crate::pmp::PmpClimatologyAdapter::new()));
        registry
    }

    /// Registers an adapter under its source type.
    pub fn register(&mut self, adapter: Arc<dyn DatasetAdapter>) {
        self.adapters.insert(adapter.source_type(), adapter);
    }

    /// Returns the adapter for a source type.
    #[must_use]
    pub fn adapter(&self, source_type: &SourceType) -> Option<Arc<dyn DatasetAdapter>> {
        self.adapters.get(source_type).map(Arc::clone)
    }

    /// Returns the registered source types.
    #[must_use]
    pub fn source_types(&self) -> Vec<SourceType> {
        self.adapters.keys().cloned().collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
