// crates/climate-eval-core/src/core/mod.rs
// ============================================================================
// Module: Climate Eval Core Types
// Description: Canonical dataset, requirement, and execution structures.
// Purpose: Provide stable, serializable types for the evaluation engine.
// Dependencies: serde, sha2, time
// ============================================================================

//! ## Overview
//! Core types define the dataset catalog rows, the data requirements declared
//! by diagnostics, the execution lifecycle entities, and the CMEC result
//! bundles. These types are the canonical source of truth for the store
//! schema and any derived surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cmec;
pub mod dataset;
pub mod diagnostic;
pub mod execution;
pub mod hashing;
pub mod identifiers;
pub mod requirement;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::cmec::BundleError;
pub use self::cmec::METRIC_BUNDLE_FILENAME;
pub use self::cmec::MetricBundle;
pub use self::cmec::MetricDimensions;
pub use self::cmec::OUTPUT_BUNDLE_FILENAME;
pub use self::cmec::OutputBundle;
pub use self::cmec::OutputFileReference;
pub use self::cmec::Provenance;
pub use self::dataset::DatasetRecord;
pub use self::dataset::FacetMap;
pub use self::dataset::FileRecord;
pub use self::dataset::ResolvedDataset;
pub use self::dataset::StoredDataset;
pub use self::dataset::StoredFile;
pub use self::diagnostic::DiagnosticSummary;
pub use self::diagnostic::ExecutionDefinition;
pub use self::diagnostic::ExecutionResult;
pub use self::execution::Execution;
pub use self::execution::ExecutionGroup;
pub use self::execution::ExecutionInput;
pub use self::execution::ExecutionOutput;
pub use self::execution::ExecutionStatus;
pub use self::execution::MetricValue;
pub use self::execution::OutputKind;
pub use self::execution::OutputManifestEntry;
pub use self::execution::SeriesMetricValue;
pub use self::hashing::DatasetCoordinate;
pub use self::hashing::canonical_dataset_lines;
pub use self::hashing::dataset_hash;
pub use self::hashing::sha256_hex;
pub use self::identifiers::DatasetId;
pub use self::identifiers::DatasetVersion;
pub use self::identifiers::DiagnosticSlug;
pub use self::identifiers::ExecutionGroupId;
pub use self::identifiers::ExecutionId;
pub use self::identifiers::FileId;
pub use self::identifiers::InstanceId;
pub use self::identifiers::ProviderSlug;
pub use self::identifiers::SourceType;
pub use self::requirement::DataRequirement;
pub use self::requirement::FacetFilter;
pub use self::requirement::FacetMatch;
pub use self::requirement::GroupConstraint;
pub use self::requirement::GroupKey;
pub use self::time::TimeRange;
pub use self::time::Timestamp;
