// crates/climate-eval-catalog/src/lib.rs
// ============================================================================
// Module: Climate Eval Catalog Library
// Description: Dataset ingestion, metadata adapters, and catalog queries.
// Purpose: Turn dataset roots into catalog rows and answer filtered queries.
// Dependencies: climate-eval-core, glob, rayon, sha2, walkdir
// ============================================================================

//! ## Overview
//! The catalog crate owns everything between the filesystem and the dataset
//! rows of the store: per-source-type metadata adapters, the parallel ingest
//! walk, and tabular query helpers. The store stays the single source of
//! truth; this crate never keeps dataset state of its own.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod adapter;
pub mod cmip6;
pub mod ingest;
pub mod netcdf;
pub mod obs4mips;
pub mod pmp;
pub mod query;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use adapter::AdapterError;
pub use adapter::AdapterRegistry;
pub use adapter::DatasetAdapter;
pub use adapter::DatasetKey;
pub use adapter::FileMetadata;
pub use cmip6::Cmip6Adapter;
pub use cmip6::Cmip6Parser;
pub use ingest::IngestError;
pub use ingest::IngestOptions;
pub use ingest::IngestReport;
pub use ingest::SkippedFile;
pub use ingest::ingest;
pub use netcdf::NetcdfError;
pub use netcdf::NetcdfHeader;
pub use netcdf::parse_header;
pub use obs4mips::Obs4MipsAdapter;
pub use pmp::PmpClimatologyAdapter;
pub use query::CatalogRow;
pub use query::CatalogTable;
pub use query::list;
pub use query::query;
