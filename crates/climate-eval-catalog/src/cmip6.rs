// crates/climate-eval-catalog/src/cmip6.rs
// ============================================================================
// Module: CMIP6 Metadata Adapter
// Description: CMIP6 Data Reference Syntax and header-based metadata parsing.
// Purpose: Turn CMOR-compliant CMIP6 file paths into dataset records.
// Dependencies: climate-eval-core, crate::netcdf
// ============================================================================

//! ## Overview
//! CMIP6 publications follow the Data Reference Syntax: the trailing path
//! components are
//! `<activity_id>/<institution_id>/<source_id>/<experiment_id>/<member_id>/`
//! `<table_id>/<variable_id>/<grid_label>/<version>/<filename>.nc`, with the
//! filename carrying the same facets plus an optional time range. The `drs`
//! parser trusts this layout; the `complete` parser opens the file and reads
//! the global attributes from the netCDF classic header, falling back to the
//! path when the file is netCDF-4. The instance identifier is version
//! independent; the version directory becomes the dataset version.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use climate_eval_core::DatasetVersion;
use climate_eval_core::FacetMap;
use climate_eval_core::InstanceId;
use climate_eval_core::SourceType;
use climate_eval_core::TimeRange;
use tracing::warn;

use crate::adapter::AdapterError;
use crate::adapter::DatasetAdapter;
use crate::adapter::FileMetadata;
use crate::ingest::IngestOptions;
use crate::netcdf;
use crate::netcdf::NetcdfError;

// ============================================================================
// SECTION: Parser Mode
// ============================================================================

/// CMIP6 metadata parser selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cmip6Parser {
    /// Extract facets from the path segments (fast, trusts layout).
    #[default]
    Drs,
    /// Open the file and read global attributes (slow, trusts contents).
    Complete,
}

// ============================================================================
// SECTION: Facet Order
// ============================================================================

/// DRS path facets from the version directory upward.
const DRS_PARENT_FACETS: [&str; 9] = [
    "version",
    "grid_label",
    "variable_id",
    "table_id",
    "member_id",
    "experiment_id",
    "source_id",
    "institution_id",
    "activity_id",
];

/// Facet order inside the instance identifier.
const INSTANCE_FACETS: [&str; 8] = [
    "activity_id",
    "institution_id",
    "source_id",
    "experiment_id",
    "member_id",
    "table_id",
    "variable_id",
    "grid_label",
];

/// Global attributes read by the complete parser, with the facet each maps
/// to.
const HEADER_FACETS: [(&str, &str); 8] = [
    ("activity_id", "activity_id"),
    ("institution_id", "institution_id"),
    ("source_id", "source_id"),
    ("experiment_id", "experiment_id"),
    ("variant_label", "member_id"),
    ("table_id", "table_id"),
    ("variable_id", "variable_id"),
    ("grid_label", "grid_label"),
];

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// CMIP6 dataset adapter.
#[derive(Debug, Default)]
pub struct Cmip6Adapter;

impl Cmip6Adapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DatasetAdapter for Cmip6Adapter {
    fn source_type(&self) -> SourceType {
        SourceType::cmip6()
    }

    fn extract_file_metadata(
        &self,
        path: &Path,
        options: &IngestOptions,
    ) -> Result<FileMetadata, AdapterError> {
        match options.parser {
            Cmip6Parser::Drs => extract_from_path(path),
            Cmip6Parser::Complete => extract_from_header(path),
        }
    }
}

// ============================================================================
// SECTION: DRS Path Parsing
// ============================================================================

/// Extracts metadata from the DRS path layout.
fn extract_from_path(path: &Path) -> Result<FileMetadata, AdapterError> {
    let invalid = |reason: &str| AdapterError::InvalidPath {
        source_type: SourceType::cmip6(),
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
        if components.len() == DRS_PARENT_FACETS.len() {
            break;
        }
        let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
            break;
        };
        components.push(name.to_string());
        ancestor = dir.parent();
    }
    if components.len() < DRS_PARENT_FACETS.len() {
        return Err(invalid("fewer path components than the DRS layout requires"));
    }

    let mut facets = FacetMap::new();
    let mut version = None;
    for (facet, value) in DRS_PARENT_FACETS.iter().zip(components.iter()) {
        if *facet == "version" {
            if !is_version_directory(value) {
                return Err(invalid("version directory must match vYYYYMMDD"));
            }
            version = Some(DatasetVersion::new(value.clone()));
        } else {
            facets.insert((*facet).to_string(), value.clone());
        }
    }
    let version = version.ok_or_else(|| invalid("missing version directory"))?;

    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 6 {
        return Err(invalid("filename has fewer facet tokens than CMOR requires"));
    }
    if tokens[0] != facets["variable_id"] {
        return Err(invalid("filename variable does not match path variable"));
    }
    let time_range = tokens.last().and_then(|token| parse_time_token(token));

    Ok(FileMetadata {
        instance_id: instance_id_from_facets(&facets),
        version,
        variable_id: facets.get("variable_id").cloned(),
        time_range,
        facets,
    })
}

/// Returns true when a directory name is a `vYYYYMMDD` version.
fn is_version_directory(name: &str) -> bool {
    let Some(digits) = name.strip_prefix('v') else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}

/// Builds the version-independent instance identifier.
fn instance_id_from_facets(facets: &FacetMap) -> InstanceId {
    let mut parts = vec!["CMIP6".to_string()];
    for facet in INSTANCE_FACETS {
        parts.push(facets.get(facet).cloned().unwrap_or_default());
    }
    InstanceId::new(parts.join("."))
}

// ============================================================================
// SECTION: Time Range Tokens
// ============================================================================

/// Parses a CMOR filename time token (`YYYY-YYYY`, `YYYYMM-YYYYMM`, or
/// `YYYYMMDD-YYYYMMDD`) into a half-open range.
pub(crate) fn parse_time_token(token: &str) -> Option<TimeRange> {
    let (start, end) = token.split_once('-')?;
    if start.len() != end.len() || !is_all_digits(start) || !is_all_digits(end) {
        return None;
    }
    match start.len() {
        4 => {
            let start_year = start.parse().ok()?;
            let end_year = end.parse().ok()?;
            TimeRange::from_months(start_year, 1, end_year, 12)
        }
        6 => {
            let (start_year, start_month) = split_year_month(start)?;
            let (end_year, end_month) = split_year_month(end)?;
            TimeRange::from_months(start_year, start_month, end_year, end_month)
        }
        8 => {
            // Day resolution collapses to the enclosing months.
            let (start_year, start_month) = split_year_month(&start[0..6])?;
            let (end_year, end_month) = split_year_month(&end[0..6])?;
            TimeRange::from_months(start_year, start_month, end_year, end_month)
        }
        _ => None,
    }
}

/// Returns true when the token is non-empty ASCII digits.
fn is_all_digits(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit())
}

/// Splits a `YYYYMM` token into year and month.
fn split_year_month(token: &str) -> Option<(i32, u8)> {
    let year = token.get(0..4)?.parse().ok()?;
    let month = token.get(4..6)?.parse().ok()?;
    Some((year, month))
}

// ============================================================================
// SECTION: Complete Parsing
// ============================================================================

/// Extracts metadata by reading the file's global attributes.
fn extract_from_header(path: &Path) -> Result<FileMetadata, AdapterError> {
    let bytes = fs::read(path).map_err(|err| AdapterError::Unreadable {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let header = match netcdf::parse_header(&bytes) {
        Ok(header) => header,
        Err(NetcdfError::NotClassic) => {
            warn!(path = %path.display(), "not a classic netcdf file; falling back to drs parsing");
            return extract_from_path(path);
        }
        Err(err) => {
            return Err(AdapterError::Unreadable {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };

    let mut facets = FacetMap::new();
    for (attribute, facet) in HEADER_FACETS {
        let Some(value) = header.attribute(attribute) else {
            return Err(AdapterError::Unreadable {
                path: path.display().to_string(),
                reason: format!("missing global attribute {attribute}"),
            });
        };
        facets.insert(facet.to_string(), value.to_string());
    }

    // The version lives in the publication layout, not the file; fall back
    // to a `version` attribute for files outside a DRS tree.
    let version = version_from_path(path)
        .or_else(|| header.attribute("version").map(DatasetVersion::new))
        .ok_or_else(|| AdapterError::InvalidPath {
            source_type: SourceType::cmip6(),
            path: path.display().to_string(),
            reason: "no version directory or version attribute".to_string(),
        })?;

    let time_range = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('_').next())
        .and_then(parse_time_token);

    Ok(FileMetadata {
        instance_id: instance_id_from_facets(&facets),
        version,
        variable_id: facets.get("variable_id").cloned(),
        time_range,
        facets,
    })
}

/// Finds a `vYYYYMMDD` ancestor directory name.
fn version_from_path(path: &Path) -> Option<DatasetVersion> {
    let mut ancestor = path.parent();
    while let Some(dir) = ancestor {
        if let Some(name) = dir.file_name().and_then(|name| name.to_str())
            && is_version_directory(name)
        {
            return Some(DatasetVersion::new(name));
        }
        ancestor = dir.parent();
    }
    None
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

    const DRS_PATH: &str = "/data/CMIP6/CMIP/CSIRO/ACCESS-ESM1-5/historical/r1i1p1f1/Amon/tas/gn/v20210101/tas_Amon_ACCESS-ESM1-5_historical_r1i1p1f1_gn_185001-201412.nc";

    fn options() -> IngestOptions {
        IngestOptions::default()
    }

    #[test]
    fn drs_path_parses_into_facets_and_version() {
        let adapter = Cmip6Adapter::new();
        let metadata = adapter.extract_file_metadata(Path::new(DRS_PATH), &options()).unwrap();
        assert_eq!(
            metadata.instance_id.as_str(),
            "CMIP6.CMIP.CSIRO.ACCESS-ESM1-5.historical.r1i1p1f1.Amon.tas.gn"
        );
        assert_eq!(metadata.version.as_str(), "v20210101");
        assert_eq!(metadata.facets["source_id"], "ACCESS-ESM1-5");
        assert_eq!(metadata.facets["member_id"], "r1i1p1f1");
        assert_eq!(metadata.variable_id.as_deref(), Some("tas"));
        assert_eq!(metadata.time_range, TimeRange::from_months(1850, 1, 2014, 12));
    }

    #[test]
    fn instance_id_is_version_independent() {
        let adapter = Cmip6Adapter::new();
        let newer = DRS_PATH.replace("v20210101", "v20230601");
        let old = adapter.extract_file_metadata(Path::new(DRS_PATH), &options()).unwrap();
        let new = adapter.extract_file_metadata(Path::new(&newer), &options()).unwrap();
        assert_eq!(old.instance_id, new.instance_id);
        assert_ne!(old.version, new.version);
    }

    #[test]
    fn filename_variable_mismatch_is_rejected() {
        let adapter = Cmip6Adapter::new();
        let path = DRS_PATH.replace("tas_Amon", "pr_Amon");
        let err = adapter.extract_file_metadata(Path::new(&path), &options()).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPath { .. }));
    }

    #[test]
    fn shallow_paths_are_rejected() {
        let adapter = Cmip6Adapter::new();
        let err = adapter
            .extract_file_metadata(Path::new("/data/tas_Amon_x_y_z_gn.nc"), &options())
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPath { .. }));
    }

    #[test]
    fn fixed_field_files_have_no_time_range() {
        let adapter = Cmip6Adapter::new();
        let path = "/data/CMIP6/CMIP/CSIRO/ACCESS-ESM1-5/historical/r1i1p1f1/fx/areacella/gn/v20210101/areacella_fx_ACCESS-ESM1-5_historical_r1i1p1f1_gn.nc";
        let metadata = adapter.extract_file_metadata(Path::new(path), &options()).unwrap();
        assert_eq!(metadata.time_range, None);
        assert_eq!(metadata.variable_id.as_deref(), Some("areacella"));
    }

    #[test]
    fn time_tokens_cover_year_month_and_day_forms() {
        assert_eq!(parse_time_token("1850-2014"), TimeRange::from_months(1850, 1, 2014, 12));
        assert_eq!(parse_time_token("185001-201412"), TimeRange::from_months(1850, 1, 2014, 12));
        assert_eq!(
            parse_time_token("18500101-20141231"),
            TimeRange::from_months(1850, 1, 2014, 12)
        );
        assert_eq!(parse_time_token("gn"), None);
        assert_eq!(parse_time_token("185001-abc"), None);
    }

    #[test]
    fn complete_parser_reads_classic_header_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("v20210101");
        std::fs::create_dir_all(&version_dir).unwrap();
        let file_path =
            version_dir.join("tas_Amon_ACCESS-ESM1-5_historical_r1i1p1f1_gn_185001-201412.nc");
        let bytes = crate::netcdf::build_classic_header(
            &[
                ("activity_id", "CMIP"),
                ("institution_id", "CSIRO"),
                ("source_id", "ACCESS-ESM1-5"),
                ("experiment_id", "historical"),
                ("variant_label", "r1i1p1f1"),
                ("table_id", "Amon"),
                ("variable_id", "tas"),
                ("grid_label", "gn"),
            ],
            &["time", "lat", "lon", "tas"],
        );
        std::fs::write(&file_path, bytes).unwrap();

        let adapter = Cmip6Adapter::new();
        let opts = IngestOptions {
            parser: Cmip6Parser::Complete,
            ..IngestOptions::default()
        };
        let metadata = adapter.extract_file_metadata(&file_path, &opts).unwrap();
        assert_eq!(
            metadata.instance_id.as_str(),
            "CMIP6.CMIP.CSIRO.ACCESS-ESM1-5.historical.r1i1p1f1.Amon.tas.gn"
        );
        assert_eq!(metadata.version.as_str(), "v20210101");
        assert_eq!(metadata.time_range, TimeRange::from_months(1850, 1, 2014, 12));
    }
}
