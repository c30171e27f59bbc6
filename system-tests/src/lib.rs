// system-tests/src/lib.rs
// ============================================================================
// Module: System Test Harness
// Description: Shared fixtures for end-to-end evaluation scenarios.
// Purpose: Assemble a full engine (catalog, store, providers, executor) on
//          temp directories.
// Dependencies: climate-eval-catalog, climate-eval-core,
//               climate-eval-executor, climate-eval-providers,
//               climate-eval-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! End-to-end scenarios assemble the same collaborators the CLI wires
//! together: a durable SQLite store on a temp directory, the built-in
//! metadata adapters, the in-process example provider, and the synchronous
//! executor. Fixture datasets are laid out as real CMIP6 DRS trees so
//! ingestion exercises the same path parsing production uses.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-harness helpers are permitted to assert."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use climate_eval_catalog::AdapterRegistry;
use climate_eval_catalog::IngestOptions;
use climate_eval_catalog::IngestReport;
use climate_eval_core::DiagnosticLookup;
use climate_eval_core::EvaluationStore;
use climate_eval_core::SourceType;
use climate_eval_core::Timestamp;
use climate_eval_executor::ExecutionRunner;
use climate_eval_executor::RunnerConfig;
use climate_eval_executor::SynchronousExecutor;
use climate_eval_providers::EXAMPLE_PROVIDER_NAME;
use climate_eval_providers::ProviderRegistry;
use climate_eval_store_sqlite::SqliteEvaluationStore;
use climate_eval_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Fully-wired engine over temp directories.
pub struct Harness {
    /// Owns every path used by the engine.
    pub tmp: TempDir,
    /// Durable store.
    pub store: Arc<SqliteEvaluationStore>,
    /// Metadata adapters.
    pub adapters: AdapterRegistry,
    /// Diagnostic providers.
    pub registry: Arc<ProviderRegistry>,
}

impl Harness {
    /// Assembles a fresh engine with the example provider registered.
    #[must_use]
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let store_config =
            SqliteStoreConfig::new(tmp.path().join("eval.db"), tmp.path().join("results"));
        let store = Arc::new(SqliteEvaluationStore::open(store_config).expect("open store"));
        let mut registry = ProviderRegistry::new();
        registry
            .register_entry_point(
                EXAMPLE_PROVIDER_NAME,
                &serde_json::Value::Object(serde_json::Map::new()),
            )
            .expect("register example provider");
        Self {
            tmp,
            store,
            adapters: AdapterRegistry::with_builtin_adapters(),
            registry: Arc::new(registry),
        }
    }

    /// Returns the dataset root fixtures are written under.
    #[must_use]
    pub fn data_root(&self) -> PathBuf {
        self.tmp.path().join("data")
    }

    /// Ingests the fixture data root as CMIP6.
    pub fn ingest_cmip6(&self) -> IngestReport {
        climate_eval_catalog::ingest(
            self.store.as_ref(),
            &self.adapters,
            &SourceType::cmip6(),
            &[self.data_root()],
            &IngestOptions::default(),
        )
        .expect("ingest")
    }

    /// Registers diagnostics in the store and returns their summaries.
    #[must_use]
    pub fn register_diagnostics(&self) -> Vec<climate_eval_core::DiagnosticSummary> {
        let summaries = self.registry.summaries();
        for summary in &summaries {
            self.store.register_diagnostic(summary, Timestamp::now()).expect("register");
        }
        summaries
    }

    /// Builds a synchronous executor over the harness store and providers.
    #[must_use]
    pub fn sync_executor(&self) -> SynchronousExecutor {
        SynchronousExecutor::new(self.runner())
    }

    /// Builds the shared execution runner.
    #[must_use]
    pub fn runner(&self) -> ExecutionRunner {
        ExecutionRunner::new(
            Arc::clone(&self.store) as Arc<dyn EvaluationStore>,
            Arc::clone(&self.registry) as Arc<dyn DiagnosticLookup>,
            RunnerConfig::new(self.tmp.path().join("scratch")),
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Writes one CMIP6 DRS file and returns its path.
pub fn write_cmip6_file(
    root: &Path,
    variable: &str,
    experiment: &str,
    member: &str,
    version: &str,
    time_token: Option<&str>,
) -> PathBuf {
    let table = "Amon";
    let dir = root
        .join("CMIP6/CMIP/CSIRO/ACCESS-ESM1-5")
        .join(experiment)
        .join(member)
        .join(table)
        .join(variable)
        .join("gn")
        .join(version);
    fs::create_dir_all(&dir).expect("create drs dir");
    let stem = time_token.map_or_else(
        || format!("{variable}_{table}_ACCESS-ESM1-5_{experiment}_{member}_gn"),
        |token| format!("{variable}_{table}_ACCESS-ESM1-5_{experiment}_{member}_gn_{token}"),
    );
    let path = dir.join(format!("{stem}.nc"));
    fs::write(&path, format!("fixture:{stem}")).expect("write fixture");
    path
}
