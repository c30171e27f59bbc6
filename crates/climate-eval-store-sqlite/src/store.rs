// crates/climate-eval-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Evaluation Store
// Description: Durable EvaluationStore backed by SQLite WAL.
// Purpose: Persist the dataset catalog and execution lifecycle with strict
//          boundary invariants.
// Dependencies: climate-eval-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`EvaluationStore`] using `SQLite`.
//! Dataset facets live in a side table keyed by `(dataset_id, name)` so a new
//! source type never changes the schema; a thin view per source type is
//! created on first ingest for ergonomic querying. Boundary invariants are
//! enforced in the schema itself: a partial unique index guarantees at most
//! one `running` execution per group, and `(group, dataset_hash)` uniqueness
//! is a table constraint. Status changes are compare-and-set updates guarded
//! by the expected current status. Before any schema migration a timestamped
//! copy of the database is made and the oldest copies beyond the retention
//! bound are pruned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use climate_eval_core::DatasetId;
use climate_eval_core::DatasetRecord;
use climate_eval_core::DatasetUpsert;
use climate_eval_core::DatasetVersion;
use climate_eval_core::DiagnosticSlug;
use climate_eval_core::DiagnosticSummary;
use climate_eval_core::EvaluationStore;
use climate_eval_core::Execution;
use climate_eval_core::ExecutionGroup;
use climate_eval_core::ExecutionGroupId;
use climate_eval_core::ExecutionId;
use climate_eval_core::ExecutionInput;
use climate_eval_core::ExecutionOutput;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::FacetMap;
use climate_eval_core::FileId;
use climate_eval_core::FileRecord;
use climate_eval_core::GroupFilter;
use climate_eval_core::GroupKey;
use climate_eval_core::InstanceId;
use climate_eval_core::MetricValue;
use climate_eval_core::OutputKind;
use climate_eval_core::OutputManifestEntry;
use climate_eval_core::ProviderSlug;
use climate_eval_core::ResolvedDataset;
use climate_eval_core::SeriesMetricValue;
use climate_eval_core::SourceType;
use climate_eval_core::StoreError;
use climate_eval_core::StoredDataset;
use climate_eval_core::StoredFile;
use climate_eval_core::TimeRange;
use climate_eval_core::Timestamp;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;
use time::Date;
use time::Month;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of retained migration backups.
const DEFAULT_MAX_BACKUPS: usize = 5;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` evaluation store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `results_root` is the absolute root all output paths are stored
///   relative to.
/// - `max_backups` must be greater than zero.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Absolute results root for recorded outputs.
    pub results_root: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Whether schema migrations may run on open.
    pub run_migrations: bool,
    /// Number of timestamped migration backups retained.
    pub max_backups: usize,
}

impl SqliteStoreConfig {
    /// Creates a config with defaults for the given database and results
    /// paths.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, results_root: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            results_root: results_root.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            run_migrations: true,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding row payloads.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Db(message)
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a rusqlite error, classifying constraint violations.
fn map_db_error(err: &rusqlite::Error, context: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = err
        && failure.code == ErrorCode::ConstraintViolation
    {
        return StoreError::Consistency(format!("{context}: {err}"));
    }
    StoreError::Db(format!("{context}: {err}"))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed evaluation store with WAL support.
///
/// # Invariants
/// - Connection access is serialized through a mutex; one transaction per
///   group settlement.
/// - Output paths are stored relative to `results_root`.
pub struct SqliteEvaluationStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Mutex<Connection>,
}

impl SqliteEvaluationStore {
    /// Opens an `SQLite`-backed evaluation store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened,
    /// validated, or migrated.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        if config.max_backups == 0 {
            return Err(SqliteStoreError::Invalid(
                "max_backups must be greater than zero".to_string(),
            ));
        }
        if !config.results_root.is_absolute() {
            return Err(SqliteStoreError::Invalid(
                "results_root must be absolute".to_string(),
            ));
        }
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection, &config)?;
        Ok(Self {
            config,
            connection: Mutex::new(connection),
        })
    }

    /// Returns the configured results root.
    #[must_use]
    pub fn results_root(&self) -> &Path {
        &self.config.results_root
    }

    /// Locks the connection, converting poisoning into a consistency error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Consistency("store mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the required pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = wal;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(connection)
}

/// SQL creating the full current schema.
const CREATE_SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS datasets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_type TEXT NOT NULL,
        instance_id TEXT NOT NULL,
        version TEXT NOT NULL,
        active INTEGER NOT NULL,
        retracted INTEGER NOT NULL DEFAULT 0,
        ingested_at INTEGER NOT NULL,
        UNIQUE (source_type, instance_id, version)
    );
    CREATE TABLE IF NOT EXISTS dataset_facets (
        dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (dataset_id, name)
    );
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
        path TEXT NOT NULL UNIQUE,
        size_bytes INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        variable_id TEXT,
        time_start TEXT,
        time_end TEXT
    );
    CREATE TABLE IF NOT EXISTS diagnostics (
        provider_slug TEXT NOT NULL,
        diagnostic_slug TEXT NOT NULL,
        registered_at INTEGER NOT NULL,
        stale INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (provider_slug, diagnostic_slug)
    );
    CREATE TABLE IF NOT EXISTS execution_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider_slug TEXT NOT NULL,
        diagnostic_slug TEXT NOT NULL,
        group_key TEXT NOT NULL,
        dirty INTEGER NOT NULL,
        stale INTEGER NOT NULL DEFAULT 0,
        latest_execution_id INTEGER,
        created_at INTEGER NOT NULL,
        UNIQUE (provider_slug, diagnostic_slug, group_key)
    );
    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL REFERENCES execution_groups(id),
        dataset_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at INTEGER,
        finished_at INTEGER,
        output_directory TEXT,
        log_path TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        failure_reason TEXT,
        heartbeat_at INTEGER,
        UNIQUE (group_id, dataset_hash)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_one_running
        ON executions (group_id) WHERE status = 'running';
    CREATE TABLE IF NOT EXISTS execution_inputs (
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        dataset_id INTEGER NOT NULL REFERENCES datasets(id),
        version TEXT NOT NULL,
        PRIMARY KEY (execution_id, dataset_id)
    );
    CREATE TABLE IF NOT EXISTS execution_outputs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        description TEXT
    );
    CREATE TABLE IF NOT EXISTS metric_values (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        facets_json TEXT NOT NULL,
        value REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS series_metric_values (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        facets_json TEXT NOT NULL,
        index_name TEXT NOT NULL,
        index_json TEXT NOT NULL,
        values_json TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS leases (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );";

/// Initializes the `SQLite` schema or migrates an older version.
fn initialize_schema(
    connection: &mut Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(CREATE_SCHEMA_SQL)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) if value < SCHEMA_VERSION && config.run_migrations => {
            // Future migrations branch from here; the backup is taken before
            // any schema change is applied.
            drop(tx);
            backup_database(config)?;
            return Err(SqliteStoreError::VersionMismatch(format!(
                "no migration path from schema version {value}"
            )));
        }
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value} (migrations disabled)"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Migration Backups
// ============================================================================

/// Copies the database to a timestamped backup and prunes old copies.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Io`] when the copy fails.
pub fn backup_database(config: &SqliteStoreConfig) -> Result<PathBuf, SqliteStoreError> {
    let stamp = Timestamp::now().unix_seconds();
    let backup_path = config.path.with_extension(format!("backup.{stamp}"));
    fs::copy(&config.path, &backup_path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    info!(backup = %backup_path.display(), "created datastore backup before migration");
    prune_backups(config)?;
    Ok(backup_path)
}

/// Deletes the oldest backups beyond the retention bound.
fn prune_backups(config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    let Some(parent) = config.path.parent() else {
        return Ok(());
    };
    let Some(stem) = config.path.file_stem().and_then(|stem| stem.to_str()) else {
        return Ok(());
    };
    let prefix = format!("{stem}.backup.");
    let mut backups: Vec<PathBuf> = fs::read_dir(parent)
        .map_err(|err| SqliteStoreError::Io(err.to_string()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect();
    backups.sort();
    while backups.len() > config.max_backups {
        let oldest = backups.remove(0);
        fs::remove_file(&oldest).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Serializes a date as `YYYY-MM-DD`.
fn date_to_text(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Parses a `YYYY-MM-DD` date.
fn date_from_text(text: &str) -> Result<Date, StoreError> {
    let mut parts = text.splitn(3, '-');
    let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(StoreError::Invalid(format!("malformed date: {text}")));
    };
    let year: i32 =
        year.parse().map_err(|_| StoreError::Invalid(format!("malformed date: {text}")))?;
    let month: u8 =
        month.parse().map_err(|_| StoreError::Invalid(format!("malformed date: {text}")))?;
    let day: u8 =
        day.parse().map_err(|_| StoreError::Invalid(format!("malformed date: {text}")))?;
    let month =
        Month::try_from(month).map_err(|_| StoreError::Invalid(format!("malformed date: {text}")))?;
    Date::from_calendar_date(year, month, day)
        .map_err(|_| StoreError::Invalid(format!("malformed date: {text}")))
}

/// Parses a surrogate id column into a non-zero identifier.
fn surrogate<T>(raw: i64, build: impl Fn(u64) -> Option<T>) -> Result<T, StoreError> {
    u64::try_from(raw)
        .ok()
        .and_then(build)
        .ok_or_else(|| StoreError::Consistency(format!("invalid surrogate key: {raw}")))
}

/// Loads one dataset row with facets and files.
fn load_dataset(tx: &Connection, raw_id: i64) -> Result<ResolvedDataset, StoreError> {
    let (source_type, instance_id, version, active, retracted, ingested_at) = tx
        .query_row(
            "SELECT source_type, instance_id, version, active, retracted, ingested_at
             FROM datasets WHERE id = ?1",
            params![raw_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|err| map_db_error(&err, "load dataset"))?
        .ok_or_else(|| StoreError::NotFound(format!("dataset {raw_id}")))?;

    let mut facets = FacetMap::new();
    let mut statement = tx
        .prepare("SELECT name, value FROM dataset_facets WHERE dataset_id = ?1")
        .map_err(|err| map_db_error(&err, "load facets"))?;
    let rows = statement
        .query_map(params![raw_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|err| map_db_error(&err, "load facets"))?;
    for row in rows {
        let (name, value) = row.map_err(|err| map_db_error(&err, "load facets"))?;
        facets.insert(name, value);
    }

    let mut files = Vec::new();
    let mut statement = tx
        .prepare(
            "SELECT id, path, size_bytes, checksum, variable_id, time_start, time_end
             FROM files WHERE dataset_id = ?1 ORDER BY path",
        )
        .map_err(|err| map_db_error(&err, "load files"))?;
    let rows = statement
        .query_map(params![raw_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })
        .map_err(|err| map_db_error(&err, "load files"))?;
    for row in rows {
        let (file_id, path, size_bytes, checksum, variable_id, time_start, time_end) =
            row.map_err(|err| map_db_error(&err, "load files"))?;
        let time_range = match (time_start, time_end) {
            (Some(start), Some(end)) => {
                TimeRange::new(date_from_text(&start)?, date_from_text(&end)?)
            }
            _ => None,
        };
        files.push(StoredFile {
            id: surrogate(file_id, FileId::from_raw)?,
            dataset_id: surrogate(raw_id, DatasetId::from_raw)?,
            record: FileRecord {
                path: PathBuf::from(path),
                size_bytes: u64::try_from(size_bytes).unwrap_or_default(),
                checksum,
                variable_id,
                time_range,
            },
        });
    }

    Ok(ResolvedDataset {
        dataset: StoredDataset {
            id: surrogate(raw_id, DatasetId::from_raw)?,
            record: DatasetRecord {
                source_type: SourceType::new(source_type),
                instance_id: InstanceId::new(instance_id),
                version: DatasetVersion::new(version),
                facets,
            },
            active: active != 0,
            retracted: retracted != 0,
            ingested_at: Timestamp::from_unix_seconds(ingested_at),
        },
        files,
    })
}

/// Raw execution row columns in [`EXECUTION_COLUMNS`] order.
type ExecutionColumns = (
    i64,
    i64,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
);

/// Maps one execution row.
fn map_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

/// Column list shared by execution queries.
const EXECUTION_COLUMNS: &str = "id, group_id, dataset_hash, status, started_at, finished_at, \
                                 output_directory, log_path, retry_count, failure_reason";

/// Builds an [`Execution`] from mapped columns.
fn build_execution(columns: ExecutionColumns) -> Result<Execution, StoreError> {
    let (
        id,
        group_id,
        dataset_hash,
        status,
        started_at,
        finished_at,
        output_directory,
        log_path,
        retry_count,
        failure_reason,
    ) = columns;
    let status = ExecutionStatus::parse(&status)
        .ok_or_else(|| StoreError::Consistency(format!("unknown execution status: {status}")))?;
    Ok(Execution {
        id: surrogate(id, ExecutionId::from_raw)?,
        group_id: surrogate(group_id, ExecutionGroupId::from_raw)?,
        dataset_hash,
        status,
        started_at: started_at.map(Timestamp::from_unix_seconds),
        finished_at: finished_at.map(Timestamp::from_unix_seconds),
        output_directory: output_directory.map(PathBuf::from),
        log_path: log_path.map(PathBuf::from),
        retry_count: u32::try_from(retry_count).unwrap_or_default(),
        failure_reason,
    })
}

/// Raw group row columns in [`GROUP_COLUMNS`] order.
type GroupColumns = (i64, String, String, String, i64, i64, Option<i64>, i64);

/// Maps one group row.
fn map_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

/// Column list shared by group queries.
const GROUP_COLUMNS: &str =
    "id, provider_slug, diagnostic_slug, group_key, dirty, stale, latest_execution_id, created_at";

/// Builds an [`ExecutionGroup`] from mapped columns.
fn build_group(columns: GroupColumns) -> Result<ExecutionGroup, StoreError> {
    let (id, provider_slug, diagnostic_slug, group_key, dirty, stale, latest, created_at) = columns;
    let latest_execution_id = match latest {
        Some(raw) => Some(surrogate(raw, ExecutionId::from_raw)?),
        None => None,
    };
    Ok(ExecutionGroup {
        id: surrogate(id, ExecutionGroupId::from_raw)?,
        provider_slug: ProviderSlug::new(provider_slug),
        diagnostic_slug: DiagnosticSlug::new(diagnostic_slug),
        group_key: GroupKey::from_canonical(&group_key),
        dirty: dirty != 0,
        stale: stale != 0,
        latest_execution_id,
        created_at: Timestamp::from_unix_seconds(created_at),
    })
}

/// Creates the ergonomic per-source-type facet view on first ingest.
fn ensure_source_view(tx: &Transaction<'_>, source_type: &SourceType) -> Result<(), StoreError> {
    let suffix: String = source_type
        .as_str()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    let sql = format!(
        "CREATE VIEW IF NOT EXISTS catalog_{suffix} AS
         SELECT d.id AS dataset_id, d.instance_id, d.version, d.active, f.name, f.value
         FROM datasets d JOIN dataset_facets f ON f.dataset_id = d.id
         WHERE d.source_type = '{}'",
        source_type.as_str()
    );
    tx.execute_batch(&sql).map_err(|err| map_db_error(&err, "create source view"))?;
    Ok(())
}

/// Validates that every metric facet map equals the declared facet set.
fn validate_facets(
    declared: &BTreeSet<String>,
    facet_maps: impl Iterator<Item = BTreeSet<String>>,
) -> Result<(), StoreError> {
    for facets in facet_maps {
        if &facets != declared {
            return Err(StoreError::Invalid(format!(
                "metric facets {facets:?} do not match declared facets {declared:?}"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: EvaluationStore Implementation
// ============================================================================

impl EvaluationStore for SqliteEvaluationStore {
    fn upsert_dataset(
        &self,
        record: &DatasetRecord,
        files: &[FileRecord],
        ingested_at: Timestamp,
    ) -> Result<DatasetUpsert, StoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM datasets WHERE source_type = ?1 AND instance_id = ?2 AND version = ?3",
                params![
                    record.source_type.as_str(),
                    record.instance_id.as_str(),
                    record.version.as_str()
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err, "find dataset"))?;
        if let Some(raw_id) = existing {
            tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
            return Ok(DatasetUpsert {
                dataset_id: surrogate(raw_id, DatasetId::from_raw)?,
                created: false,
                superseded: None,
            });
        }

        let prior_active: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, version FROM datasets
                 WHERE source_type = ?1 AND instance_id = ?2 AND active = 1",
                params![record.source_type.as_str(), record.instance_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| map_db_error(&err, "find active dataset"))?;
        let becomes_active = prior_active
            .as_ref()
            .is_none_or(|(_, version)| record.version.as_str() > version.as_str());
        let mut superseded = None;
        if becomes_active && let Some((prior_id, _)) = &prior_active {
            tx.execute("UPDATE datasets SET active = 0 WHERE id = ?1", params![prior_id])
                .map_err(|err| map_db_error(&err, "deactivate dataset"))?;
            superseded = Some(surrogate(*prior_id, DatasetId::from_raw)?);
        }

        tx.execute(
            "INSERT INTO datasets (source_type, instance_id, version, active, retracted, ingested_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                record.source_type.as_str(),
                record.instance_id.as_str(),
                record.version.as_str(),
                i64::from(becomes_active),
                ingested_at.unix_seconds()
            ],
        )
        .map_err(|err| map_db_error(&err, "insert dataset"))?;
        let raw_id = tx.last_insert_rowid();

        for (name, value) in &record.facets {
            tx.execute(
                "INSERT INTO dataset_facets (dataset_id, name, value) VALUES (?1, ?2, ?3)",
                params![raw_id, name, value],
            )
            .map_err(|err| map_db_error(&err, "insert facet"))?;
        }
        for file in files {
            if !file.path.is_absolute() {
                return Err(StoreError::Invalid(format!(
                    "file path must be absolute: {}",
                    file.path.display()
                )));
            }
            tx.execute(
                "INSERT INTO files (dataset_id, path, size_bytes, checksum, variable_id, time_start, time_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    raw_id,
                    file.path.display().to_string(),
                    i64::try_from(file.size_bytes).unwrap_or(i64::MAX),
                    file.checksum,
                    file.variable_id,
                    file.time_range.map(|range| date_to_text(range.start())),
                    file.time_range.map(|range| date_to_text(range.end())),
                ],
            )
            .map_err(|err| map_db_error(&err, "insert file"))?;
        }
        ensure_source_view(&tx, &record.source_type)?;
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(DatasetUpsert {
            dataset_id: surrogate(raw_id, DatasetId::from_raw)?,
            created: true,
            superseded,
        })
    }

    fn active_datasets(&self, source_type: &SourceType) -> Result<Vec<ResolvedDataset>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT id FROM datasets
                 WHERE source_type = ?1 AND active = 1 AND retracted = 0
                 ORDER BY instance_id",
            )
            .map_err(|err| map_db_error(&err, "list active"))?;
        let ids: Vec<i64> = statement
            .query_map(params![source_type.as_str()], |row| row.get(0))
            .map_err(|err| map_db_error(&err, "list active"))?
            .collect::<Result<_, _>>()
            .map_err(|err| map_db_error(&err, "list active"))?;
        drop(statement);
        ids.into_iter().map(|raw_id| load_dataset(&connection, raw_id)).collect()
    }

    fn source_types(&self) -> Result<Vec<SourceType>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare("SELECT DISTINCT source_type FROM datasets ORDER BY source_type")
            .map_err(|err| map_db_error(&err, "list source types"))?;
        let types = statement
            .query_map(params![], |row| row.get::<_, String>(0))
            .map_err(|err| map_db_error(&err, "list source types"))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|err| map_db_error(&err, "list source types"))?;
        Ok(types.into_iter().map(SourceType::new).collect())
    }

    fn find_dataset(
        &self,
        source_type: &SourceType,
        instance_id: &InstanceId,
        version: &DatasetVersion,
    ) -> Result<Option<ResolvedDataset>, StoreError> {
        let connection = self.lock()?;
        let raw_id: Option<i64> = connection
            .query_row(
                "SELECT id FROM datasets WHERE source_type = ?1 AND instance_id = ?2 AND version = ?3",
                params![source_type.as_str(), instance_id.as_str(), version.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| map_db_error(&err, "find dataset"))?;
        raw_id.map(|raw_id| load_dataset(&connection, raw_id)).transpose()
    }

    fn dataset_with_files(&self, dataset_id: DatasetId) -> Result<ResolvedDataset, StoreError> {
        let connection = self.lock()?;
        let raw = i64::try_from(dataset_id.get())
            .map_err(|_| StoreError::Invalid("dataset id out of range".to_string()))?;
        load_dataset(&connection, raw)
    }

    fn retract_dataset(&self, dataset_id: DatasetId) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let changed = connection
            .execute(
                "UPDATE datasets SET retracted = 1, active = 0 WHERE id = ?1",
                params![i64::try_from(dataset_id.get()).unwrap_or_default()],
            )
            .map_err(|err| map_db_error(&err, "retract dataset"))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("dataset {dataset_id}")));
        }
        Ok(())
    }

    fn register_diagnostic(
        &self,
        summary: &DiagnosticSummary,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute(
                "INSERT INTO diagnostics (provider_slug, diagnostic_slug, registered_at, stale)
                 VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT (provider_slug, diagnostic_slug)
                 DO UPDATE SET stale = 0, registered_at = excluded.registered_at",
                params![
                    summary.provider_slug.as_str(),
                    summary.diagnostic_slug.as_str(),
                    now.unix_seconds()
                ],
            )
            .map_err(|err| map_db_error(&err, "register diagnostic"))?;
        Ok(())
    }

    fn mark_unregistered_stale(
        &self,
        registered: &[(ProviderSlug, DiagnosticSlug)],
    ) -> Result<u64, StoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let live: BTreeSet<(String, String)> = registered
            .iter()
            .map(|(provider, diagnostic)| {
                (provider.as_str().to_string(), diagnostic.as_str().to_string())
            })
            .collect();
        let pairs: Vec<(String, String)> = {
            let mut statement = tx
                .prepare("SELECT provider_slug, diagnostic_slug FROM diagnostics")
                .map_err(|err| map_db_error(&err, "list diagnostics"))?;
            let rows = statement
                .query_map(params![], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|err| map_db_error(&err, "list diagnostics"))?;
            rows.collect::<Result<_, _>>().map_err(|err| map_db_error(&err, "list diagnostics"))?
        };
        let mut flagged = 0;
        for (provider, diagnostic) in pairs {
            if live.contains(&(provider.clone(), diagnostic.clone())) {
                continue;
            }
            tx.execute(
                "UPDATE diagnostics SET stale = 1 WHERE provider_slug = ?1 AND diagnostic_slug = ?2",
                params![provider, diagnostic],
            )
            .map_err(|err| map_db_error(&err, "flag diagnostic"))?;
            let changed = tx
                .execute(
                    "UPDATE execution_groups SET stale = 1
                     WHERE provider_slug = ?1 AND diagnostic_slug = ?2 AND stale = 0",
                    params![provider, diagnostic],
                )
                .map_err(|err| map_db_error(&err, "flag groups"))?;
            flagged += u64::try_from(changed).unwrap_or(u64::MAX);
        }
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(flagged)
    }

    fn ensure_group(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        group_key: &GroupKey,
        now: Timestamp,
    ) -> Result<ExecutionGroup, StoreError> {
        let connection = self.lock()?;
        connection
            .execute(
                "INSERT OR IGNORE INTO execution_groups
                 (provider_slug, diagnostic_slug, group_key, dirty, stale, created_at)
                 VALUES (?1, ?2, ?3, 1, 0, ?4)",
                params![
                    provider.as_str(),
                    diagnostic.as_str(),
                    group_key.canonical(),
                    now.unix_seconds()
                ],
            )
            .map_err(|err| map_db_error(&err, "ensure group"))?;
        let columns = connection
            .query_row(
                &format!(
                    "SELECT {GROUP_COLUMNS} FROM execution_groups
                     WHERE provider_slug = ?1 AND diagnostic_slug = ?2 AND group_key = ?3"
                ),
                params![provider.as_str(), diagnostic.as_str(), group_key.canonical()],
                map_group,
            )
            .map_err(|err| map_db_error(&err, "load group"))?;
        build_group(columns)
    }

    fn find_execution_by_hash(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
    ) -> Result<Option<Execution>, StoreError> {
        let connection = self.lock()?;
        let columns = connection
            .query_row(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM executions
                     WHERE group_id = ?1 AND dataset_hash = ?2"
                ),
                params![i64::try_from(group_id.get()).unwrap_or_default(), dataset_hash],
                map_execution,
            )
            .optional()
            .map_err(|err| map_db_error(&err, "find execution"))?;
        columns.map(build_execution).transpose()
    }

    fn create_execution(
        &self,
        group_id: ExecutionGroupId,
        dataset_hash: &str,
        inputs: &[(DatasetId, DatasetVersion)],
        _now: Timestamp,
    ) -> Result<Execution, StoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let raw_group = i64::try_from(group_id.get())
            .map_err(|_| StoreError::Invalid("group id out of range".to_string()))?;
        let inserted = tx.execute(
            "INSERT INTO executions (group_id, dataset_hash, status) VALUES (?1, ?2, 'pending')",
            params![raw_group, dataset_hash],
        );
        if let Err(err) = inserted {
            if let rusqlite::Error::SqliteFailure(failure, _) = &err
                && failure.code == ErrorCode::ConstraintViolation
            {
                return Err(StoreError::Conflict(format!(
                    "execution with hash {dataset_hash} already exists in group {group_id}"
                )));
            }
            return Err(map_db_error(&err, "insert execution"));
        }
        let raw_id = tx.last_insert_rowid();
        for (dataset_id, version) in inputs {
            tx.execute(
                "INSERT INTO execution_inputs (execution_id, dataset_id, version) VALUES (?1, ?2, ?3)",
                params![
                    raw_id,
                    i64::try_from(dataset_id.get()).unwrap_or_default(),
                    version.as_str()
                ],
            )
            .map_err(|err| map_db_error(&err, "insert input"))?;
        }
        tx.execute(
            "UPDATE execution_groups SET dirty = 1, latest_execution_id = ?2 WHERE id = ?1",
            params![raw_group, raw_id],
        )
        .map_err(|err| map_db_error(&err, "update group"))?;
        let columns = tx
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                params![raw_id],
                map_execution,
            )
            .map_err(|err| map_db_error(&err, "load execution"))?;
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        build_execution(columns)
    }

    fn set_group_clean(&self, group_id: ExecutionGroupId) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let changed = connection
            .execute(
                "UPDATE execution_groups SET dirty = 0 WHERE id = ?1",
                params![i64::try_from(group_id.get()).unwrap_or_default()],
            )
            .map_err(|err| map_db_error(&err, "clean group"))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        Ok(())
    }

    fn reconcile_group_staleness(
        &self,
        provider: &ProviderSlug,
        diagnostic: &DiagnosticSlug,
        live_keys: &[GroupKey],
    ) -> Result<u64, StoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let live: BTreeSet<String> = live_keys.iter().map(GroupKey::canonical).collect();
        let rows: Vec<(i64, String, bool)> = {
            let mut statement = tx
                .prepare(
                    "SELECT id, group_key, stale FROM execution_groups
                     WHERE provider_slug = ?1 AND diagnostic_slug = ?2",
                )
                .map_err(|err| map_db_error(&err, "list groups"))?;
            let rows = statement
                .query_map(params![provider.as_str(), diagnostic.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0))
                })
                .map_err(|err| map_db_error(&err, "list groups"))?;
            rows.collect::<Result<_, _>>().map_err(|err| map_db_error(&err, "list groups"))?
        };
        let mut flagged = 0;
        for (raw_id, group_key, stale) in rows {
            let is_live = live.contains(&group_key);
            if !is_live && !stale {
                tx.execute("UPDATE execution_groups SET stale = 1 WHERE id = ?1", params![raw_id])
                    .map_err(|err| map_db_error(&err, "flag group"))?;
                flagged += 1;
            } else if is_live && stale {
                tx.execute("UPDATE execution_groups SET stale = 0 WHERE id = ?1", params![raw_id])
                    .map_err(|err| map_db_error(&err, "unflag group"))?;
            }
        }
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(flagged)
    }

    fn transition_execution(
        &self,
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        now: Timestamp,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::Invalid(format!("illegal transition {from} -> {to}")));
        }
        let connection = self.lock()?;
        let raw_id = i64::try_from(execution_id.get()).unwrap_or_default();
        let seconds = now.unix_seconds();
        let result = match to {
            ExecutionStatus::Running => connection.execute(
                "UPDATE executions SET status = 'running', started_at = ?3, heartbeat_at = ?3
                 WHERE id = ?1 AND status = ?2",
                params![raw_id, from.as_str(), seconds],
            ),
            ExecutionStatus::Failed => connection.execute(
                "UPDATE executions SET status = 'failed', finished_at = ?3, failure_reason = ?4
                 WHERE id = ?1 AND status = ?2",
                params![raw_id, from.as_str(), seconds, failure_reason],
            ),
            ExecutionStatus::Succeeded | ExecutionStatus::Cancelled => connection.execute(
                &format!(
                    "UPDATE executions SET status = '{}', finished_at = ?3
                     WHERE id = ?1 AND status = ?2",
                    to.as_str()
                ),
                params![raw_id, from.as_str(), seconds],
            ),
            ExecutionStatus::Pending => connection.execute(
                "UPDATE executions SET status = 'pending', started_at = NULL, finished_at = NULL
                 WHERE id = ?1 AND status = ?2",
                params![raw_id, from.as_str()],
            ),
        };
        let changed = match result {
            Ok(changed) => changed,
            Err(err) => {
                // The partial unique index turns a second concurrent
                // `running` into a constraint violation.
                return Err(map_db_error(&err, "transition execution"));
            }
        };
        if changed == 0 {
            let current: Option<String> = connection
                .query_row(
                    "SELECT status FROM executions WHERE id = ?1",
                    params![raw_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| map_db_error(&err, "read status"))?;
            return match current {
                None => Err(StoreError::NotFound(format!("execution {execution_id}"))),
                Some(current) => Err(StoreError::Conflict(format!(
                    "execution {execution_id} is {current}, expected {from}"
                ))),
            };
        }
        Ok(())
    }

    fn retry_execution(&self, execution_id: ExecutionId) -> Result<(), StoreError> {
        let connection = self.lock()?;
        let raw_id = i64::try_from(execution_id.get()).unwrap_or_default();
        let changed = connection
            .execute(
                "UPDATE executions SET status = 'pending', retry_count = retry_count + 1,
                        failure_reason = NULL, started_at = NULL, finished_at = NULL
                 WHERE id = ?1 AND status = 'failed'",
                params![raw_id],
            )
            .map_err(|err| map_db_error(&err, "retry execution"))?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "execution {execution_id} is not failed; only failed executions retry"
            )));
        }
        Ok(())
    }

    fn record_heartbeat(
        &self,
        execution_id: ExecutionId,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute(
                "UPDATE executions SET heartbeat_at = ?2 WHERE id = ?1",
                params![i64::try_from(execution_id.get()).unwrap_or_default(), now.unix_seconds()],
            )
            .map_err(|err| map_db_error(&err, "heartbeat"))?;
        Ok(())
    }

    fn recover_lost_executions(
        &self,
        stale_before: Timestamp,
        reason: &str,
        now: Timestamp,
    ) -> Result<Vec<ExecutionId>, StoreError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let lost: Vec<i64> = {
            let mut statement = tx
                .prepare(
                    "SELECT id FROM executions
                     WHERE status = 'running'
                       AND (heartbeat_at IS NULL OR heartbeat_at < ?1)",
                )
                .map_err(|err| map_db_error(&err, "find lost"))?;
            let rows = statement
                .query_map(params![stale_before.unix_seconds()], |row| row.get(0))
                .map_err(|err| map_db_error(&err, "find lost"))?;
            rows.collect::<Result<_, _>>().map_err(|err| map_db_error(&err, "find lost"))?
        };
        for raw_id in &lost {
            tx.execute(
                "UPDATE executions SET status = 'failed', failure_reason = ?2, finished_at = ?3
                 WHERE id = ?1",
                params![raw_id, reason, now.unix_seconds()],
            )
            .map_err(|err| map_db_error(&err, "fail lost"))?;
        }
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        lost.into_iter().map(|raw| surrogate(raw, ExecutionId::from_raw)).collect()
    }

    fn record_outputs(
        &self,
        execution_id: ExecutionId,
        source_dir: &Path,
        manifest: &[OutputManifestEntry],
    ) -> Result<(), StoreError> {
        for entry in manifest {
            if entry.relative_path.is_absolute() {
                return Err(StoreError::Invalid(format!(
                    "output path must be relative: {}",
                    entry.relative_path.display()
                )));
            }
        }
        let group = {
            let execution = self.execution(execution_id)?;
            self.group(execution.group_id)?
        };
        let relative_dir = PathBuf::from(group.provider_slug.as_str())
            .join(group.diagnostic_slug.as_str())
            .join(group.group_key.path_component())
            .join(execution_id.to_string());
        let target_dir = self.config.results_root.join(&relative_dir);
        for entry in manifest {
            let source = source_dir.join(&entry.relative_path);
            let target = target_dir.join(&entry.relative_path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
            }
            fs::copy(&source, &target).map_err(|err| {
                StoreError::Io(format!("copy {} failed: {err}", source.display()))
            })?;
        }

        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let raw_id = i64::try_from(execution_id.get()).unwrap_or_default();
        for entry in manifest {
            tx.execute(
                "INSERT INTO execution_outputs (execution_id, kind, relative_path, mime_type, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    raw_id,
                    entry.kind.as_str(),
                    entry.relative_path.display().to_string(),
                    entry.mime_type,
                    entry.description
                ],
            )
            .map_err(|err| map_db_error(&err, "insert output"))?;
        }
        let log_path = manifest
            .iter()
            .find(|entry| entry.kind == OutputKind::Log)
            .map(|entry| relative_dir.join(&entry.relative_path).display().to_string());
        tx.execute(
            "UPDATE executions SET output_directory = ?2, log_path = COALESCE(?3, log_path)
             WHERE id = ?1",
            params![raw_id, relative_dir.display().to_string(), log_path],
        )
        .map_err(|err| map_db_error(&err, "update execution"))?;
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(())
    }

    fn record_metric_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[MetricValue],
    ) -> Result<(), StoreError> {
        validate_facets(
            declared_facets,
            values.iter().map(|value| value.facets.keys().cloned().collect()),
        )?;
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let raw_id = i64::try_from(execution_id.get()).unwrap_or_default();
        for value in values {
            let facets_json = serde_json::to_string(&value.facets)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT INTO metric_values (execution_id, facets_json, value) VALUES (?1, ?2, ?3)",
                params![raw_id, facets_json, value.value],
            )
            .map_err(|err| map_db_error(&err, "insert metric"))?;
        }
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(())
    }

    fn record_series_values(
        &self,
        execution_id: ExecutionId,
        declared_facets: &BTreeSet<String>,
        values: &[SeriesMetricValue],
    ) -> Result<(), StoreError> {
        validate_facets(
            declared_facets,
            values.iter().map(|value| value.facets.keys().cloned().collect()),
        )?;
        for value in values {
            if !value.is_aligned() {
                return Err(StoreError::Invalid(
                    "series index and values have different lengths".to_string(),
                ));
            }
        }
        let mut connection = self.lock()?;
        let tx = connection.transaction().map_err(|err| map_db_error(&err, "begin"))?;
        let raw_id = i64::try_from(execution_id.get()).unwrap_or_default();
        for value in values {
            let facets_json = serde_json::to_string(&value.facets)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            let index_json = serde_json::to_string(&value.index)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            let values_json = serde_json::to_string(&value.values)
                .map_err(|err| StoreError::Invalid(err.to_string()))?;
            tx.execute(
                "INSERT INTO series_metric_values
                 (execution_id, facets_json, index_name, index_json, values_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![raw_id, facets_json, value.index_name, index_json, values_json],
            )
            .map_err(|err| map_db_error(&err, "insert series"))?;
        }
        tx.commit().map_err(|err| map_db_error(&err, "commit"))?;
        Ok(())
    }

    fn execution(&self, execution_id: ExecutionId) -> Result<Execution, StoreError> {
        let connection = self.lock()?;
        let columns = connection
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                params![i64::try_from(execution_id.get()).unwrap_or_default()],
                map_execution,
            )
            .optional()
            .map_err(|err| map_db_error(&err, "load execution"))?
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
        build_execution(columns)
    }

    fn group(&self, group_id: ExecutionGroupId) -> Result<ExecutionGroup, StoreError> {
        let connection = self.lock()?;
        let columns = connection
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM execution_groups WHERE id = ?1"),
                params![i64::try_from(group_id.get()).unwrap_or_default()],
                map_group,
            )
            .optional()
            .map_err(|err| map_db_error(&err, "load group"))?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?;
        build_group(columns)
    }

    fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<ExecutionGroup>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!("SELECT {GROUP_COLUMNS} FROM execution_groups ORDER BY id"))
            .map_err(|err| map_db_error(&err, "list groups"))?;
        let rows = statement
            .query_map(params![], map_group)
            .map_err(|err| map_db_error(&err, "list groups"))?;
        let mut groups = Vec::new();
        for row in rows {
            let group = build_group(row.map_err(|err| map_db_error(&err, "list groups"))?)?;
            if !filter.matches(&group.provider_slug, &group.diagnostic_slug) {
                continue;
            }
            if filter.dirty_only && !group.dirty {
                continue;
            }
            groups.push(group);
        }
        Ok(groups)
    }

    fn list_executions(&self, group_id: ExecutionGroupId) -> Result<Vec<Execution>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions WHERE group_id = ?1 ORDER BY id DESC"
            ))
            .map_err(|err| map_db_error(&err, "list executions"))?;
        let rows = statement
            .query_map(params![i64::try_from(group_id.get()).unwrap_or_default()], map_execution)
            .map_err(|err| map_db_error(&err, "list executions"))?;
        rows.map(|row| build_execution(row.map_err(|err| map_db_error(&err, "list executions"))?))
            .collect()
    }

    fn pending_executions(&self) -> Result<Vec<Execution>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM executions WHERE status = 'pending' ORDER BY id"
            ))
            .map_err(|err| map_db_error(&err, "list pending"))?;
        let rows = statement
            .query_map(params![], map_execution)
            .map_err(|err| map_db_error(&err, "list pending"))?;
        rows.map(|row| build_execution(row.map_err(|err| map_db_error(&err, "list pending"))?))
            .collect()
    }

    fn execution_inputs(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionInput>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT dataset_id, version FROM execution_inputs
                 WHERE execution_id = ?1 ORDER BY dataset_id",
            )
            .map_err(|err| map_db_error(&err, "list inputs"))?;
        let rows = statement
            .query_map(params![i64::try_from(execution_id.get()).unwrap_or_default()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| map_db_error(&err, "list inputs"))?;
        let mut inputs = Vec::new();
        for row in rows {
            let (dataset_id, version) = row.map_err(|err| map_db_error(&err, "list inputs"))?;
            inputs.push(ExecutionInput {
                execution_id,
                dataset_id: surrogate(dataset_id, DatasetId::from_raw)?,
                version: DatasetVersion::new(version),
            });
        }
        Ok(inputs)
    }

    fn execution_outputs(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionOutput>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT kind, relative_path, mime_type, description FROM execution_outputs
                 WHERE execution_id = ?1 ORDER BY id",
            )
            .map_err(|err| map_db_error(&err, "list outputs"))?;
        let rows = statement
            .query_map(params![i64::try_from(execution_id.get()).unwrap_or_default()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|err| map_db_error(&err, "list outputs"))?;
        let mut outputs = Vec::new();
        for row in rows {
            let (kind, relative_path, mime_type, description) =
                row.map_err(|err| map_db_error(&err, "list outputs"))?;
            let kind = OutputKind::parse(&kind)
                .ok_or_else(|| StoreError::Consistency(format!("unknown output kind: {kind}")))?;
            outputs.push(ExecutionOutput {
                execution_id,
                entry: OutputManifestEntry {
                    relative_path: PathBuf::from(relative_path),
                    kind,
                    mime_type,
                    description,
                },
            });
        }
        Ok(outputs)
    }

    fn metric_values(&self, execution_id: ExecutionId) -> Result<Vec<MetricValue>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT facets_json, value FROM metric_values
                 WHERE execution_id = ?1 ORDER BY id",
            )
            .map_err(|err| map_db_error(&err, "list metrics"))?;
        let rows = statement
            .query_map(params![i64::try_from(execution_id.get()).unwrap_or_default()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(|err| map_db_error(&err, "list metrics"))?;
        let mut values = Vec::new();
        for row in rows {
            let (facets_json, value) = row.map_err(|err| map_db_error(&err, "list metrics"))?;
            let facets: BTreeMap<String, String> = serde_json::from_str(&facets_json)
                .map_err(|err| StoreError::Consistency(format!("corrupt facets json: {err}")))?;
            values.push(MetricValue {
                facets,
                value,
            });
        }
        Ok(values)
    }

    fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        let expires_at = now
            .unix_seconds()
            .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        let changed = connection
            .execute(
                "INSERT INTO leases (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE SET holder = excluded.holder,
                                                  expires_at = excluded.expires_at
                 WHERE leases.holder = excluded.holder OR leases.expires_at <= ?4",
                params![name, holder, expires_at, now.unix_seconds()],
            )
            .map_err(|err| map_db_error(&err, "acquire lease"))?;
        Ok(changed > 0)
    }

    fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute(
                "DELETE FROM leases WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )
            .map_err(|err| map_db_error(&err, "release lease"))?;
        Ok(())
    }
}
