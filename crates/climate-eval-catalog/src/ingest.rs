// crates/climate-eval-catalog/src/ingest.rs
// ============================================================================
// Module: Dataset Ingestion
// Description: Walks dataset roots, parses metadata, and upserts rows.
// Purpose: Idempotent, parallel ingestion with per-file failure isolation.
// Dependencies: climate-eval-core, glob, rayon, sha2, walkdir
// ============================================================================

//! ## Overview
//! Ingestion expands the given paths (globs allowed, absolute paths
//! everywhere), walks directories for files matching the source type's
//! pattern, and fans metadata extraction across a worker pool. Files sharing
//! one instance identifier form a dataset whose version is the maximum of the
//! file versions. Datastore writes stay on the calling thread, batched one
//! transaction per dataset. Re-ingesting identical paths produces no new
//! rows; a newer version supersedes the prior active row, which is retained
//! for audit. A corrupt file fails the whole ingest only when
//! `skip_invalid` is off; otherwise it is logged with path and reason and
//! skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use climate_eval_core::DatasetRecord;
use climate_eval_core::EvaluationStore;
use climate_eval_core::FileRecord;
use climate_eval_core::InstanceId;
use climate_eval_core::SourceType;
use climate_eval_core::StoreError;
use climate_eval_core::Timestamp;
use rayon::prelude::*;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::adapter::AdapterRegistry;
use crate::adapter::DatasetAdapter;
use crate::adapter::DatasetKey;
use crate::adapter::FileMetadata;
use crate::cmip6::Cmip6Parser;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Options shaping one ingest pass.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Log and skip files that fail metadata extraction instead of
    /// aborting.
    pub skip_invalid: bool,
    /// Worker count for parallel metadata parsing; `None` uses the rayon
    /// default.
    pub n_jobs: Option<usize>,
    /// CMIP6 parser selection; other source types ignore this.
    pub parser: Cmip6Parser,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            skip_invalid: true,
            n_jobs: None,
            parser: Cmip6Parser::default(),
        }
    }
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// One file skipped through the `skip_invalid` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: PathBuf,
    /// Human-readable reason.
    pub reason: String,
}

/// Summary of one ingest pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Dataset rows created by this pass.
    pub datasets_created: u64,
    /// Datasets already present with an identical version.
    pub datasets_unchanged: u64,
    /// Files successfully parsed and recorded.
    pub files_ingested: u64,
    /// Files skipped with their reasons.
    pub skipped: Vec<SkippedFile>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ingestion errors.
///
/// # Invariants
/// - Per-file adapter failures surface here only when `skip_invalid` is off.
#[derive(Debug, Error)]
pub enum IngestError {
    /// No adapter is registered for the source type.
    #[error("no adapter registered for source type: {0}")]
    UnknownSourceType(SourceType),
    /// An input path is not absolute.
    #[error("ingest paths must be absolute: {0}")]
    RelativePath(String),
    /// A glob pattern failed to parse or expand.
    #[error("glob failure: {0}")]
    Glob(String),
    /// Filesystem walk or read failure.
    #[error("ingest io failure: {0}")]
    Io(String),
    /// A file failed metadata extraction with `skip_invalid` off.
    #[error("failed to ingest {path}: {reason}")]
    Adapter {
        /// Offending file path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Store interaction failed.
    #[error("ingest store failure: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Ingest
// ============================================================================

/// Ingests the given paths for one source type.
///
/// # Errors
///
/// Returns [`IngestError`] on infrastructure failure, unknown source types,
/// relative paths, or (with `skip_invalid` off) the first corrupt file.
pub fn ingest(
    store: &dyn EvaluationStore,
    registry: &AdapterRegistry,
    source_type: &SourceType,
    paths: &[PathBuf],
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    let adapter = registry
        .adapter(source_type)
        .ok_or_else(|| IngestError::UnknownSourceType(source_type.clone()))?;

    let files = expand_paths(paths, adapter.as_ref())?;
    debug!(source_type = %source_type, files = files.len(), "expanded ingest paths");

    let parsed = parse_files(adapter.as_ref(), &files, options)?;

    let mut report = IngestReport::default();
    let mut by_instance: BTreeMap<InstanceId, Vec<(DatasetKey, FileMetadata, FileRecord)>> =
        BTreeMap::new();
    for outcome in parsed {
        match outcome {
            Ok((metadata, record)) => {
                let key = adapter.derive_dataset_key(&metadata);
                by_instance
                    .entry(key.instance_id.clone())
                    .or_default()
                    .push((key, metadata, record));
            }
            Err(skipped) => {
                if !options.skip_invalid {
                    return Err(IngestError::Adapter {
                        path: skipped.path.display().to_string(),
                        reason: skipped.reason,
                    });
                }
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipping invalid file");
                report.skipped.push(skipped);
            }
        }
    }

    let now = Timestamp::now();
    for (instance_id, mut members) in by_instance {
        // Dataset version is the maximum of the member file versions.
        members.sort_by(|a, b| a.0.version.cmp(&b.0.version));
        let Some((latest_key, latest, _)) = members.last() else {
            continue;
        };
        let record = DatasetRecord {
            source_type: source_type.clone(),
            instance_id: instance_id.clone(),
            version: latest_key.version.clone(),
            facets: latest.facets.clone(),
        };
        let file_records: Vec<FileRecord> =
            members.iter().map(|(_, _, record)| record.clone()).collect();
        let upsert = store.upsert_dataset(&record, &file_records, now)?;
        if upsert.created {
            report.datasets_created += 1;
            if let Some(superseded) = upsert.superseded {
                info!(
                    instance_id = %instance_id,
                    version = %record.version,
                    superseded = %superseded,
                    "ingested new dataset version"
                );
            }
        } else {
            report.datasets_unchanged += 1;
        }
        report.files_ingested += u64::try_from(file_records.len()).unwrap_or(u64::MAX);
    }
    Ok(report)
}

// ============================================================================
// SECTION: Path Expansion
// ============================================================================

/// Expands input paths into a sorted, deduplicated file list.
fn expand_paths(
    paths: &[PathBuf],
    adapter: &dyn DatasetAdapter,
) -> Result<Vec<PathBuf>, IngestError> {
    let pattern = glob::Pattern::new(adapter.file_pattern())
        .map_err(|err| IngestError::Glob(err.to_string()))?;
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    for path in paths {
        if !path.is_absolute() {
            return Err(IngestError::RelativePath(path.display().to_string()));
        }
        let text = path.display().to_string();
        if text.contains(['*', '?', '[']) {
            let entries = glob::glob(&text).map_err(|err| IngestError::Glob(err.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|err| IngestError::Glob(err.to_string()))?;
                collect_files(&entry, &pattern, &mut files)?;
            }
        } else {
            collect_files(path, &pattern, &mut files)?;
        }
    }
    Ok(files.into_iter().collect())
}

/// Collects matching files under one expanded path.
fn collect_files(
    path: &Path,
    pattern: &glob::Pattern,
    files: &mut BTreeSet<PathBuf>,
) -> Result<(), IngestError> {
    if path.is_file() {
        files.insert(path.to_path_buf());
        return Ok(());
    }
    if !path.is_dir() {
        return Err(IngestError::Io(format!("path does not exist: {}", path.display())));
    }
    for entry in walkdir::WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|err| IngestError::Io(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry.file_name().to_str().is_some_and(|name| pattern.matches(name));
        if matches {
            files.insert(entry.path().to_path_buf());
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Parallel Parsing
// ============================================================================

/// Parses all files across a worker pool, preserving input order.
fn parse_files(
    adapter: &dyn DatasetAdapter,
    files: &[PathBuf],
    options: &IngestOptions,
) -> Result<Vec<Result<(FileMetadata, FileRecord), SkippedFile>>, IngestError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.n_jobs.unwrap_or(0))
        .build()
        .map_err(|err| IngestError::Io(err.to_string()))?;
    Ok(pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                parse_one(adapter, path, options).map_err(|reason| SkippedFile {
                    path: path.clone(),
                    reason,
                })
            })
            .collect()
    }))
}

/// Parses one file into metadata and a file record.
fn parse_one(
    adapter: &dyn DatasetAdapter,
    path: &Path,
    options: &IngestOptions,
) -> Result<(FileMetadata, FileRecord), String> {
    let metadata = adapter.extract_file_metadata(path, options).map_err(|err| err.to_string())?;
    let stat = fs::metadata(path).map_err(|err| err.to_string())?;
    let checksum = file_checksum(path).map_err(|err| err.to_string())?;
    let record = FileRecord {
        path: path.to_path_buf(),
        size_bytes: stat.len(),
        checksum,
        variable_id: metadata.variable_id.clone(),
        time_range: metadata.time_range,
    };
    Ok((metadata, record))
}

/// Streams a file through SHA-256, returning lowercase hex.
fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
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

    use climate_eval_core::InMemoryEvaluationStore;

    use super::*;

    /// Lays out a DRS tree with one CMIP6 file and returns its root.
    fn write_drs_file(root: &Path, version: &str, contents: &[u8]) -> PathBuf {
        let dir = root
            .join("CMIP6/CMIP/CSIRO/ACCESS-ESM1-5/historical/r1i1p1f1/Amon/tas/gn")
            .join(version);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tas_Amon_ACCESS-ESM1-5_historical_r1i1p1f1_gn_185001-201412.nc");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn ingest_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write_drs_file(tmp.path(), "v20210101", b"payload");
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let paths = vec![tmp.path().to_path_buf()];

        let first = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &paths,
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(first.datasets_created, 1);
        assert_eq!(first.files_ingested, 1);

        let second = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &paths,
            &IngestOptions::default(),
        )
        .unwrap();
        assert_eq!(second.datasets_created, 0);
        assert_eq!(second.datasets_unchanged, 1);
        assert_eq!(store.active_datasets(&SourceType::cmip6()).unwrap().len(), 1);
    }

    #[test]
    fn newer_version_supersedes_but_retains_prior_row() {
        let tmp = tempfile::tempdir().unwrap();
        write_drs_file(tmp.path(), "v20210101", b"old");
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let paths = vec![tmp.path().to_path_buf()];
        ingest(&store, &registry, &SourceType::cmip6(), &paths, &IngestOptions::default())
            .unwrap();

        write_drs_file(tmp.path(), "v20230601", b"new");
        let report =
            ingest(&store, &registry, &SourceType::cmip6(), &paths, &IngestOptions::default())
                .unwrap();
        assert_eq!(report.datasets_created, 1);
        assert_eq!(report.datasets_unchanged, 1);

        let active = store.active_datasets(&SourceType::cmip6()).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].dataset.record.version.as_str(), "v20230601");
    }

    #[test]
    fn invalid_files_are_skipped_with_reasons() {
        let tmp = tempfile::tempdir().unwrap();
        write_drs_file(tmp.path(), "v20210101", b"payload");
        fs::write(tmp.path().join("stray.nc"), b"not drs").unwrap();
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let paths = vec![tmp.path().to_path_buf()];

        let report =
            ingest(&store, &registry, &SourceType::cmip6(), &paths, &IngestOptions::default())
                .unwrap();
        assert_eq!(report.datasets_created, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("stray.nc"));
    }

    #[test]
    fn invalid_files_abort_when_skip_invalid_is_off() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("stray.nc"), b"not drs").unwrap();
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let options = IngestOptions {
            skip_invalid: false,
            ..IngestOptions::default()
        };

        let err = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &[tmp.path().to_path_buf()],
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Adapter { .. }));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let err = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &[PathBuf::from("relative/dir")],
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::RelativePath(_)));
    }

    #[test]
    fn unknown_source_types_are_rejected() {
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::new();
        let err = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &[],
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::UnknownSourceType(_)));
    }

    #[test]
    fn n_jobs_controls_the_parse_pool() {
        let tmp = tempfile::tempdir().unwrap();
        write_drs_file(tmp.path(), "v20210101", b"payload");
        let store = InMemoryEvaluationStore::new();
        let registry = AdapterRegistry::with_builtin_adapters();
        let options = IngestOptions {
            n_jobs: Some(2),
            ..IngestOptions::default()
        };
        let report = ingest(
            &store,
            &registry,
            &SourceType::cmip6(),
            &[tmp.path().to_path_buf()],
            &options,
        )
        .unwrap();
        assert_eq!(report.datasets_created, 1);
    }
}
