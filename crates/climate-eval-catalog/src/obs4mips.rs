// crates/climate-eval-catalog/src/obs4mips.rs
// ============================================================================
// Module: obs4MIPs Metadata Adapter
// Description: Path-layout parsing for obs4MIPs reference datasets.
// Purpose: Turn obs4MIPs publication paths into dataset records.
// Dependencies: climate-eval-core
// ============================================================================

//! ## Overview
//! obs4MIPs publications use a DRS-style layout whose trailing components are
//! `<institution_id>/<source_id>/<frequency>/<variable_id>/<grid_label>/`
//! `<version>/<filename>.nc`. The filename repeats the variable and may carry
//! a time range token in the CMOR form. The instance identifier is version
//! independent.

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
use crate::cmip6::parse_time_token;
use crate::ingest::IngestOptions;

// ============================================================================
// SECTION: Facet Order
// ============================================================================

/// Path facets from the version directory upward.
const PARENT_FACETS: [&str; 6] = [
    "version",
    "grid_label",
    "variable_id",
    "frequency",
    "source_id",
    "institution_id",
];

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// obs4MIPs dataset adapter.
#[derive(Debug, Default)]
pub struct Obs4MipsAdapter;

impl Obs4MipsAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DatasetAdapter for Obs4MipsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::obs4mips()
    }

    fn extract_file_metadata(
        &self,
        path: &Path,
        _options: &IngestOptions,
    ) -> Result<FileMetadata, AdapterError> {
        let invalid = |reason: &str| AdapterError::InvalidPath {
            source_type: SourceType::obs4mips(),
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid("missing file name"))?;
        let stem = file_name.strip_suffix(".nc").ok_or_else(|| invalid("not a .nc file"))?;

        let mut components: Vec<String> = Vec::new();
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            if components.len() == PARENT_FACETS.len() {
                break;
            }
            let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
                break;
            };
            components.push(name.to_string());
            ancestor = dir.parent();
        }
        if components.len() < PARENT_FACETS.len() {
            return Err(invalid("fewer path components than the obs4MIPs layout requires"));
        }

        let mut facets = FacetMap::new();
        let mut version = None;
        for (facet, value) in PARENT_FACETS.iter().zip(components.iter()) {
            if *facet == "version" {
                version = Some(DatasetVersion::new(value.clone()));
            } else {
                facets.insert((*facet).to_string(), value.clone());
            }
        }
        let version = version.ok_or_else(|| invalid("missing version directory"))?;

        let tokens: Vec<&str> = stem.split('_').collect();
        if tokens.first() != Some(&facets["variable_id"].as_str()) {
            return Err(invalid("filename variable does not match path variable"));
        }
        let time_range = tokens.last().and_then(|token| parse_time_token(token));

        let instance_id = InstanceId::new(format!(
            "obs4MIPs.{}.{}.{}.{}.{}",
            facets["institution_id"],
            facets["source_id"],
            facets["frequency"],
            facets["variable_id"],
            facets["grid_label"],
        ));

        Ok(FileMetadata {
            instance_id,
            version,
            variable_id: facets.get("variable_id").cloned(),
            time_range,
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

    use climate_eval_core::TimeRange;

    use super::*;

    #[test]
    fn obs4mips_path_parses_into_facets() {
        let adapter = Obs4MipsAdapter::new();
        let path = "/obs/obs4MIPs/NASA-JPL/AIRS-2-1/mon/ta/gn/v20200401/ta_mon_AIRS-2-1_gn_200209-201609.nc";
        let metadata =
            adapter.extract_file_metadata(Path::new(path), &IngestOptions::default()).unwrap();
        assert_eq!(metadata.instance_id.as_str(), "obs4MIPs.NASA-JPL.AIRS-2-1.mon.ta.gn");
        assert_eq!(metadata.version.as_str(), "v20200401");
        assert_eq!(metadata.facets["source_id"], "AIRS-2-1");
        assert_eq!(metadata.time_range, TimeRange::from_months(2002, 9, 2016, 9));
    }

    #[test]
    fn variable_mismatch_is_rejected() {
        let adapter = Obs4MipsAdapter::new();
        let path = "/obs/obs4MIPs/NASA-JPL/AIRS-2-1/mon/ta/gn/v20200401/hus_mon_AIRS-2-1_gn.nc";
        let err = adapter
            .extract_file_metadata(Path::new(path), &IngestOptions::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPath { .. }));
    }
}
