// crates/climate-eval-config/src/config.rs
// ============================================================================
// Module: Climate Eval Configuration
// Description: Configuration loading and validation for the evaluation
//              engine.
// Purpose: Provide strict, fail-closed config parsing with env overrides.
// Dependencies: directories, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded once at process start from a TOML file and held
//! in an immutable structure every component receives by reference. The file
//! is discovered through, in priority order: an explicit configuration
//! directory, the `CLIMATE_EVAL_CONFIG_DIR` environment variable, then the
//! OS-specific user config location. Environment variables always take
//! precedence over file values. Missing or invalid configuration fails
//! closed; a missing file yields validated defaults rooted in the user data
//! directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename inside the config directory.
pub const CONFIG_FILE_NAME: &str = "climate-eval.toml";
/// Environment variable overriding the configuration directory lookup.
pub const CONFIG_DIR_ENV_VAR: &str = "CLIMATE_EVAL_CONFIG_DIR";
/// Environment variable overriding the dataset cache directory.
pub const CACHE_DIR_ENV_VAR: &str = "CLIMATE_EVAL_CACHE_DIR";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Default number of retained datastore backups.
const DEFAULT_MAX_BACKUPS: usize = 5;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("config io error: {0}")]
    Io(String),
    /// The configuration file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The configuration is internally invalid.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Log Level
// ============================================================================

/// Logging verbosity selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Informational messages (default).
    #[default]
    Info,
    /// Verbose debugging output.
    Debug,
}

impl LogLevel {
    /// Returns the `tracing` filter directive for the level.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Filesystem locations used by the engine.
///
/// # Invariants
/// - All populated paths are absolute after validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for engine log files.
    pub log: Option<PathBuf>,
    /// Root for per-execution scratch directories.
    pub scratch: Option<PathBuf>,
    /// Root for provider software environments.
    pub software: Option<PathBuf>,
    /// Root the results tree is written under.
    pub results: Option<PathBuf>,
    /// Controlled-vocabulary file enabling strict facet-value checking.
    pub dimensions_cv: Option<PathBuf>,
    /// Dataset cache directory (overridden by `CLIMATE_EVAL_CACHE_DIR`).
    pub cache: Option<PathBuf>,
}

/// Datastore configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Datastore location; a filesystem path or `sqlite://` URL.
    pub database_url: Option<String>,
    /// Whether schema migrations may run on open.
    pub run_migrations: bool,
    /// Number of timestamped pre-migration backups retained.
    pub max_backups: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            run_migrations: true,
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

/// Executor selection and variant-specific options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Fully-qualified name of the executor variant.
    pub executor: String,
    /// Variant-specific options.
    pub config: ExecutorSettings,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executor: "climate_eval_executor::pool::LocalPoolExecutor".to_string(),
            config: ExecutorSettings::default(),
        }
    }
}

/// Variant-specific executor options; unused fields are ignored by the
/// selected variant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Worker count for the local pool (default: available parallelism).
    pub pool_size: Option<usize>,
    /// Keep failed executions' scratch directories for debugging.
    pub retain_scratch_on_failure: bool,
    /// Broker URL for the distributed queue variant.
    pub broker_url: Option<String>,
    /// Transient redelivery bound for the queue variant.
    pub max_redeliveries: Option<u32>,
    /// Scheduler kind for the batch variant (`slurm` or `pbs`).
    pub scheduler: Option<String>,
    /// Extra scheduler submission arguments.
    pub scheduler_args: Vec<String>,
    /// Worker command the batch variant appends the execution id to.
    pub worker_command: Vec<String>,
    /// Job state poll interval in seconds for the batch variant.
    pub poll_interval_secs: Option<u64>,
}

/// One configured diagnostic provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    /// Fully-qualified name of the provider entry point.
    pub provider: String,
    /// Provider-specific options.
    #[serde(default = "empty_provider_options")]
    pub config: toml::Value,
}

/// Returns the empty options table used when a provider entry has none.
fn empty_provider_options() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl ProviderEntry {
    /// Returns the provider options as a JSON value for registry
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the options cannot be
    /// converted.
    pub fn config_as_json(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(&self.config).map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// Immutable engine configuration loaded at process start.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Logging verbosity.
    pub log_level: LogLevel,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Datastore configuration.
    pub db: DbConfig,
    /// Executor selection.
    pub executor: ExecutorConfig,
    /// Configured diagnostic providers.
    pub diagnostic_providers: Vec<ProviderEntry>,
}

impl EvalConfig {
    /// Loads configuration using the discovery rules, applying environment
    /// overrides and defaults, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(explicit_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = resolve_config_dir(explicit_dir)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.is_file() {
            let bytes =
                fs::read(&config_path).map_err(|err| ConfigError::Io(err.to_string()))?;
            if bytes.len() > MAX_CONFIG_FILE_SIZE {
                return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
            }
            let content = std::str::from_utf8(&bytes)
                .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?
        } else {
            debug!(path = %config_path.display(), "no config file; using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.fill_path_defaults()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(cache_dir) = env::var(CACHE_DIR_ENV_VAR)
            && !cache_dir.is_empty()
        {
            self.paths.cache = Some(PathBuf::from(cache_dir));
        }
    }

    /// Fills unset paths from the OS user data directory.
    fn fill_path_defaults(&mut self) -> Result<(), ConfigError> {
        let data_root = default_data_dir()?;
        self.paths.log.get_or_insert_with(|| data_root.join("log"));
        self.paths.scratch.get_or_insert_with(|| data_root.join("scratch"));
        self.paths.software.get_or_insert_with(|| data_root.join("software"));
        self.paths.results.get_or_insert_with(|| data_root.join("results"));
        self.paths.cache.get_or_insert_with(|| data_root.join("cache"));
        if self.db.database_url.is_none() {
            self.db.database_url =
                Some(data_root.join("climate-eval.db").display().to_string());
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any setting is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (label, path) in [
            ("paths.log", &self.paths.log),
            ("paths.scratch", &self.paths.scratch),
            ("paths.software", &self.paths.software),
            ("paths.results", &self.paths.results),
            ("paths.cache", &self.paths.cache),
        ] {
            if let Some(path) = path
                && !path.is_absolute()
            {
                return Err(ConfigError::Invalid(format!(
                    "{label} must be absolute: {}",
                    path.display()
                )));
            }
        }
        if let Some(cv) = &self.paths.dimensions_cv
            && !cv.is_absolute()
        {
            return Err(ConfigError::Invalid(format!(
                "paths.dimensions_cv must be absolute: {}",
                cv.display()
            )));
        }
        if self.db.max_backups == 0 {
            return Err(ConfigError::Invalid("db.max_backups must be greater than zero".to_string()));
        }
        if self.executor.executor.is_empty() {
            return Err(ConfigError::Invalid("executor.executor must not be empty".to_string()));
        }
        if let Some(pool_size) = self.executor.config.pool_size
            && pool_size == 0
        {
            return Err(ConfigError::Invalid(
                "executor.config.pool_size must be greater than zero".to_string(),
            ));
        }
        for entry in &self.diagnostic_providers {
            if entry.provider.is_empty() {
                return Err(ConfigError::Invalid(
                    "diagnostic_providers[].provider must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Returns the datastore filesystem path derived from `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unsupported URL schemes.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        let Some(url) = &self.db.database_url else {
            return Err(ConfigError::Invalid("db.database_url is unset".to_string()));
        };
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") {
            return Err(ConfigError::Invalid(format!(
                "unsupported database scheme: {url} (embedded sqlite only)"
            )));
        }
        Ok(PathBuf::from(url))
    }

    /// Returns the results root, set during path default filling.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the path is unset.
    pub fn results_root(&self) -> Result<&Path, ConfigError> {
        self.paths
            .results
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("paths.results is unset".to_string()))
    }

    /// Returns the scratch root, set during path default filling.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the path is unset.
    pub fn scratch_root(&self) -> Result<&Path, ConfigError> {
        self.paths
            .scratch
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("paths.scratch is unset".to_string()))
    }
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Resolves the configuration directory using the priority rules.
fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = env::var(CONFIG_DIR_ENV_VAR)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from("org", "climate-eval", "climate-eval")
        .ok_or_else(|| ConfigError::Io("no home directory available".to_string()))?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Returns the OS user data directory for engine state.
fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("org", "climate-eval", "climate-eval")
        .ok_or_else(|| ConfigError::Io("no home directory available".to_string()))?;
    Ok(dirs.data_dir().to_path_buf())
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

    fn write_config(dir: &Path, content: &str) {
        fs::write(dir.join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[test]
    fn explicit_dir_config_is_loaded_and_validated() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
log_level = "debug"

[paths]
results = "/srv/climate-eval/results"

[db]
database_url = "/srv/climate-eval/eval.db"
max_backups = 3

[executor]
executor = "climate_eval_executor::sync::SynchronousExecutor"

[[diagnostic_providers]]
provider = "climate_eval_providers::example::ExampleProvider"

[diagnostic_providers.config]
variables = ["tas", "pr"]
"#,
        );
        let config = EvalConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/srv/climate-eval/eval.db"));
        assert_eq!(config.results_root().unwrap(), Path::new("/srv/climate-eval/results"));
        assert_eq!(config.diagnostic_providers.len(), 1);
        let json = config.diagnostic_providers[0].config_as_json().unwrap();
        assert_eq!(json["variables"][0], "tas");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EvalConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.paths.results.as_ref().unwrap().is_absolute());
        assert!(config.db.run_migrations);
        assert_eq!(config.db.max_backups, 5);
    }

    #[test]
    fn relative_paths_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
[paths]
results = "relative/results"
"#,
        );
        let err = EvalConfig::load(Some(tmp.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_max_backups_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
[db]
max_backups = 0
"#,
        );
        let err = EvalConfig::load(Some(tmp.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn sqlite_url_prefix_is_stripped() {
        let config = EvalConfig {
            db: DbConfig {
                database_url: Some("sqlite:///data/eval.db".to_string()),
                ..DbConfig::default()
            },
            ..EvalConfig::default()
        };
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/data/eval.db"));
    }

    #[test]
    fn server_database_schemes_are_rejected() {
        let config = EvalConfig {
            db: DbConfig {
                database_url: Some("postgres://host/db".to_string()),
                ..DbConfig::default()
            },
            ..EvalConfig::default()
        };
        assert!(matches!(config.database_path(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_fails_closed() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "log_level = [not toml");
        let err = EvalConfig::load(Some(tmp.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
