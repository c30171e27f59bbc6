// crates/climate-eval-catalog/src/pmp.rs
// ============================================================================
// Module: PMP Climatology Metadata Adapter
// Description: Filename parsing for PMP climatology reference files.
// Purpose: Turn PMP climatology files into dataset records.
// Dependencies: climate-eval-core
// ============================================================================

//! ## Overview
//! PMP climatology files are flat: a single directory of files named
//! `<variable_id>_<source_id>_<realm>_<period>.nc`, optionally published
//! under a `vYYYYMMDD` directory. Files without a version directory share the
//! fallback version `v1`, so re-ingesting the same flat directory stays
//! idempotent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use climate_eval_core::DatasetVersion;
use climate_eval_core::FacetMap;
use climate_eval_core::InstanceId;
use climate_eval_core::SourceType;

use crate::adapter::AdapterError;
use crate::adapter::DatasetAdapter;
use crate::adapter::FileMetadata;
use crate::ingest::IngestOptions;

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// PMP climatology dataset adapter.
#[derive(Debug, Default)]
pub struct PmpClimatologyAdapter;

impl PmpClimatologyAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DatasetAdapter for PmpClimatologyAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::pmp_climatology()
    }

    fn extract_file_metadata(
        &self,
        path: &Path,
        _options: &IngestOptions,
    ) -> Result<FileMetadata, AdapterError> {
        let invalid = |reason: &str| AdapterError::InvalidPath {
            source_type: SourceType::pmp_climatology(),
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid("missing file name"))?;
        let stem = file_name.strip_suffix(".nc").ok_or_else(|| invalid("not a .nc file"))?;

        let tokens: Vec<&str> = stem.split('_').collect();
        let [variable_id, source_id, realm, period] = tokens.as_slice() else {
            return Err(invalid("filename must be <variable>_<source>_<realm>_<period>"));
        };

        let version = path
            .parent()
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .filter(|name| name.starts_with('v') && name[1..].chars().all(|ch| ch.is_ascii_digit()))
            .map_or_else(|| DatasetVersion::new("v1"), DatasetVersion::new);

        let mut facets = FacetMap::new();
        facets.insert("variable_id".to_string(), (*variable_id).to_string());
        facets.insert("source_id".to_string(), (*source_id).to_string());
        facets.insert("realm".to_string(), (*realm).to_string());
        facets.insert("period".to_string(), (*period).to_string());

        Ok(FileMetadata {
            instance_id: InstanceId::new(format!("PMPClim.{source_id}.{variable_id}.{period}")),
            version,
            variable_id: Some((*variable_id).to_string()),
            time_range: None,
            facets,
        })
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
    fn pmp_filename_parses_into_facets() {
        let adapter = PmpClimatologyAdapter::new();
        let path = "/ref/pmp/v20230115/tas_ERA5_atmos_198101-201012.nc";
        let metadata =
            adapter.extract_file_metadata(Path::new(path), &IngestOptions::default()).unwrap();
        assert_eq!(metadata.instance_id.as_str(), "PMPClim.ERA5.tas.198101-201012");
        assert_eq!(metadata.version.as_str(), "v20230115");
        assert_eq!(metadata.facets["realm"], "atmos");
    }

    #[test]
    fn flat_directories_fall_back_to_v1() {
        let adapter = PmpClimatologyAdapter::new();
        let path = "/ref/pmp/tas_ERA5_atmos_198101-201012.nc";
        let metadata =
            adapter.extract_file_metadata(Path::new(path), &IngestOptions::default()).unwrap();
        assert_eq!(metadata.version.as_str(), "v1");
    }

    #[test]
    fn malformed_filenames_are_rejected() {
        let adapter = PmpClimatologyAdapter::new();
        let err = adapter
            .extract_file_metadata(Path::new("/ref/pmp/tas.nc"), &IngestOptions::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPath { .. }));
    }
}
