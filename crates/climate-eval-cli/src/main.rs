#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// crates/climate-eval-cli/src/main.rs
// ============================================================================
// Module: Climate Eval CLI Entry Point
// Description: Command dispatcher for ingestion, solving, and inspection.
// Purpose: Expose the core engine operations on the command line.
// Dependencies: clap, climate-eval-catalog, climate-eval-config,
//               climate-eval-core, climate-eval-executor,
//               climate-eval-providers, climate-eval-store-sqlite
// ============================================================================

//! ## Overview
//! The CLI wires the configuration, the durable store, the adapter registry,
//! and the provider registry together, then dispatches the core operations:
//! `ingest`, `list-datasets`, `solve` (solve-and-execute),
//! `list-execution-groups`, `inspect-execution`, and `retry-execution`. The
//! process exits non-zero when any execution failed, was cancelled, or the
//! wall-clock budget was exceeded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use climate_eval_catalog::AdapterRegistry;
use climate_eval_catalog::Cmip6Parser;
use climate_eval_catalog::IngestOptions;
use climate_eval_config::EvalConfig;
use climate_eval_config::init_logging;
use climate_eval_core::DiagnosticLookup;
use climate_eval_core::EvaluationStore;
use climate_eval_core::ExecutionId;
use climate_eval_core::Executor;
use climate_eval_core::ExecutorSummary;
use climate_eval_core::GroupFilter;
use climate_eval_core::SolveOptions;
use climate_eval_core::SourceType;
use climate_eval_core::Timestamp;
use climate_eval_core::solve;
use climate_eval_executor::ExecutionRunner;
use climate_eval_executor::HpcBatchExecutor;
use climate_eval_executor::InMemoryBroker;
use climate_eval_executor::LocalPoolExecutor;
use climate_eval_executor::PbsScheduler;
use climate_eval_executor::QueueExecutor;
use climate_eval_executor::QueueWorker;
use climate_eval_executor::RunnerConfig;
use climate_eval_executor::SlurmScheduler;
use climate_eval_executor::SynchronousExecutor;
use climate_eval_executor::recover_lost_workers;
use climate_eval_executor::run_topic;
use climate_eval_providers::EXAMPLE_PROVIDER_NAME;
use climate_eval_providers::ProviderRegistry;
use climate_eval_store_sqlite::SqliteEvaluationStore;
use climate_eval_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Heartbeat staleness bound used for lost-worker recovery.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(600);
/// Poll timeout for in-process queue workers.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(200);

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "climate-eval", version, arg_required_else_help = true)]
struct Cli {
    /// Configuration directory overriding the discovery rules.
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest dataset files into the catalog.
    Ingest(IngestCommand),
    /// List active datasets as a deduplicated projection.
    ListDatasets(ListDatasetsCommand),
    /// Solve for needed executions and run them.
    Solve(SolveCommand),
    /// List execution groups.
    ListExecutionGroups(ListGroupsCommand),
    /// Show one execution with its inputs, outputs, and metrics.
    InspectExecution(InspectCommand),
    /// Retry a failed execution.
    RetryExecution(RetryCommand),
}

/// CMIP6 parser selection on the command line.
#[derive(ValueEnum, Copy, Clone, Debug, Default)]
enum ParserArg {
    /// Extract facets from path segments.
    #[default]
    Drs,
    /// Open each file and read global attributes.
    Complete,
}

impl From<ParserArg> for Cmip6Parser {
    fn from(value: ParserArg) -> Self {
        match value {
            ParserArg::Drs => Self::Drs,
            ParserArg::Complete => Self::Complete,
        }
    }
}

/// Arguments for `ingest`.
#[derive(Args, Debug)]
struct IngestCommand {
    /// Source type of the ingested files.
    #[arg(long, value_name = "SOURCE_TYPE", default_value = "cmip6")]
    source_type: String,
    /// Absolute paths or globs to ingest.
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// Log and skip invalid files instead of aborting.
    #[arg(long, default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    skip_invalid: bool,
    /// Worker count for metadata parsing.
    #[arg(long, value_name = "N")]
    n_jobs: Option<usize>,
    /// CMIP6 parser selection.
    #[arg(long, value_enum, default_value_t = ParserArg::Drs)]
    parser: ParserArg,
}

/// Arguments for `list-datasets`.
#[derive(Args, Debug)]
struct ListDatasetsCommand {
    /// Columns to project.
    #[arg(long = "column", value_name = "NAME")]
    columns: Vec<String>,
    /// Maximum number of rows.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

/// Arguments for `solve`.
#[derive(Args, Debug)]
struct SolveCommand {
    /// Case-sensitive substring filter on provider slugs.
    #[arg(long, value_name = "SUBSTRING")]
    provider: Option<String>,
    /// Case-sensitive substring filter on diagnostic slugs.
    #[arg(long, value_name = "SUBSTRING")]
    diagnostic: Option<String>,
    /// Wall-clock budget in seconds for execution.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Solve only the first diagnostic of each provider.
    #[arg(long, action = ArgAction::SetTrue)]
    one_per_provider: bool,
    /// Resolve and diff without creating or running executions.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
}

/// Arguments for `list-execution-groups`.
#[derive(Args, Debug)]
struct ListGroupsCommand {
    /// Case-sensitive substring filter on provider slugs.
    #[arg(long, value_name = "SUBSTRING")]
    provider: Option<String>,
    /// Case-sensitive substring filter on diagnostic slugs.
    #[arg(long, value_name = "SUBSTRING")]
    diagnostic: Option<String>,
    /// Restrict to dirty groups.
    #[arg(long, action = ArgAction::SetTrue)]
    dirty_only: bool,
}

/// Arguments for `inspect-execution`.
#[derive(Args, Debug)]
struct InspectCommand {
    /// Execution identifier.
    #[arg(value_name = "EXECUTION_ID")]
    execution_id: u64,
}

/// Arguments for `retry-execution`.
#[derive(Args, Debug)]
struct RetryCommand {
    /// Execution identifier.
    #[arg(value_name = "EXECUTION_ID")]
    execution_id: u64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper with a human-readable message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Converts any displayable error into a [`CliError`].
fn cli_err(err: impl std::fmt::Display) -> CliError {
    CliError::new(err.to_string())
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = EvalConfig::load(cli.config_dir.as_deref()).map_err(cli_err)?;
    init_logging(config.log_level);
    let engine = Engine::build(&config)?;

    match cli.command {
        Commands::Ingest(command) => command_ingest(&engine, &command),
        Commands::ListDatasets(command) => command_list_datasets(&engine, &command),
        Commands::Solve(command) => command_solve(&engine, &config, &command),
        Commands::ListExecutionGroups(command) => command_list_groups(&engine, &command),
        Commands::InspectExecution(command) => command_inspect(&engine, &command),
        Commands::RetryExecution(command) => command_retry(&engine, &command),
    }
}

// ============================================================================
// SECTION: Engine Wiring
// ============================================================================

/// Wired collaborators shared by every command.
struct Engine {
    /// Durable store.
    store: Arc<SqliteEvaluationStore>,
    /// Metadata adapters.
    adapters: AdapterRegistry,
    /// Diagnostic providers.
    registry: Arc<ProviderRegistry>,
}

impl Engine {
    /// Opens the store and builds the registries from configuration.
    fn build(config: &EvalConfig) -> CliResult<Self> {
        let mut store_config = SqliteStoreConfig::new(
            config.database_path().map_err(cli_err)?,
            config.results_root().map_err(cli_err)?,
        );
        store_config.run_migrations = config.db.run_migrations;
        store_config.max_backups = config.db.max_backups;
        let store = Arc::new(SqliteEvaluationStore::open(store_config).map_err(cli_err)?);

        let mut registry = ProviderRegistry::new();
        if config.diagnostic_providers.is_empty() {
            let empty = serde_json::Value::Object(serde_json::Map::new());
            registry.register_entry_point(EXAMPLE_PROVIDER_NAME, &empty).map_err(cli_err)?;
        }
        for entry in &config.diagnostic_providers {
            let options = entry.config_as_json().map_err(cli_err)?;
            registry.register_entry_point(&entry.provider, &options).map_err(cli_err)?;
        }

        Ok(Self {
            store,
            adapters: AdapterRegistry::with_builtin_adapters(),
            registry: Arc::new(registry),
        })
    }

    /// Returns the store as a trait object.
    fn store_dyn(&self) -> Arc<dyn EvaluationStore> {
        Arc::clone(&self.store) as Arc<dyn EvaluationStore>
    }
}

// ============================================================================
// SECTION: Ingest Command
// ============================================================================

/// Runs the `ingest` subcommand.
fn command_ingest(engine: &Engine, command: &IngestCommand) -> CliResult<ExitCode> {
    let options = IngestOptions {
        skip_invalid: command.skip_invalid,
        n_jobs: command.n_jobs,
        parser: command.parser.into(),
    };
    let report = climate_eval_catalog::ingest(
        engine.store.as_ref(),
        &engine.adapters,
        &SourceType::new(command.source_type.clone()),
        &command.paths,
        &options,
    )
    .map_err(cli_err)?;
    write_stdout_line(&format!(
        "ingested {} file(s): {} dataset(s) created, {} unchanged, {} skipped",
        report.files_ingested,
        report.datasets_created,
        report.datasets_unchanged,
        report.skipped.len()
    ))
    .map_err(cli_err)?;
    for skipped in &report.skipped {
        write_stdout_line(&format!("skipped {}: {}", skipped.path.display(), skipped.reason))
            .map_err(cli_err)?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: List Datasets Command
// ============================================================================

/// Runs the `list-datasets` subcommand.
fn command_list_datasets(engine: &Engine, command: &ListDatasetsCommand) -> CliResult<ExitCode> {
    let columns = if command.columns.is_empty() {
        vec![
            "source_type".to_string(),
            "instance_id".to_string(),
            "version".to_string(),
        ]
    } else {
        command.columns.clone()
    };
    let rows = climate_eval_catalog::list(engine.store.as_ref(), &columns, command.limit)
        .map_err(cli_err)?;
    write_stdout_line(&columns.join("\t")).map_err(cli_err)?;
    for row in rows {
        let cells: Vec<&str> =
            columns.iter().map(|column| row.get(column).map_or("", String::as_str)).collect();
        write_stdout_line(&cells.join("\t")).map_err(cli_err)?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Solve Command
// ============================================================================

/// Runs the `solve` subcommand: recover, register, solve, execute.
fn command_solve(
    engine: &Engine,
    config: &EvalConfig,
    command: &SolveCommand,
) -> CliResult<ExitCode> {
    let now = Timestamp::now();
    let recovered = recover_lost_workers(engine.store.as_ref(), HEARTBEAT_TIMEOUT, now)
        .map_err(cli_err)?;
    if !recovered.is_empty() {
        write_stdout_line(&format!("recovered {} lost execution(s)", recovered.len()))
            .map_err(cli_err)?;
    }

    let summaries = engine.registry.summaries();
    for summary in &summaries {
        engine.store.register_diagnostic(summary, now).map_err(cli_err)?;
    }
    let registered: Vec<_> = summaries
        .iter()
        .map(|summary| (summary.provider_slug.clone(), summary.diagnostic_slug.clone()))
        .collect();
    engine.store.mark_unregistered_stale(&registered).map_err(cli_err)?;

    let options = SolveOptions {
        filter: GroupFilter {
            provider: command.provider.clone(),
            diagnostic: command.diagnostic.clone(),
            dirty_only: false,
        },
        one_per_provider: command.one_per_provider,
        dry_run: command.dry_run,
    };
    let outcome = solve(engine.store.as_ref(), &summaries, &options, now).map_err(cli_err)?;
    write_stdout_line(&format!(
        "solved {} diagnostic(s): {} new execution(s), {} up to date, {} already tracked, {} stale",
        outcome.diagnostics_solved,
        outcome.new_executions.len(),
        outcome.up_to_date,
        outcome.already_tracked,
        outcome.stale_flagged
    ))
    .map_err(cli_err)?;
    if command.dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    let pending = engine.store.pending_executions().map_err(cli_err)?;
    if pending.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    let summary = execute_pending(
        engine,
        config,
        pending.iter().map(|execution| execution.id).collect(),
        command.timeout.map(Duration::from_secs),
    )?;
    write_stdout_line(&format!(
        "executed: {} succeeded, {} failed, {} cancelled{}",
        summary.succeeded,
        summary.failed,
        summary.cancelled,
        if summary.timed_out { " (timed out)" } else { "" }
    ))
    .map_err(cli_err)?;
    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Guard stopping in-process queue workers after a join.
struct QueueWorkerGuard {
    /// Stop flag observed by the worker threads.
    stop: Arc<AtomicBool>,
    /// Worker thread handles.
    handles: Vec<thread::JoinHandle<()>>,
}

impl Drop for QueueWorkerGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Builds the configured executor, runs the pending executions, and applies
/// the timeout policy.
fn execute_pending(
    engine: &Engine,
    config: &EvalConfig,
    execution_ids: Vec<ExecutionId>,
    timeout: Option<Duration>,
) -> CliResult<ExecutorSummary> {
    let runner_config = RunnerConfig {
        scratch_root: config.scratch_root().map_err(cli_err)?.to_path_buf(),
        retain_scratch_on_failure: config.executor.config.retain_scratch_on_failure,
    };
    let make_runner = || {
        ExecutionRunner::new(engine.store_dyn(), Arc::clone(&engine.registry) as Arc<dyn DiagnosticLookup>, runner_config.clone())
    };

    let settings = &config.executor.config;
    let mut worker_guard = None;
    let executor: Box<dyn Executor> = match executor_kind(&config.executor.executor) {
        ExecutorKind::Synchronous => Box::new(SynchronousExecutor::new(make_runner())),
        ExecutorKind::LocalPool => {
            Box::new(LocalPoolExecutor::new(make_runner(), settings.pool_size).map_err(cli_err)?)
        }
        ExecutorKind::Queue => {
            let broker = Arc::new(InMemoryBroker::new());
            let shared_runner = Arc::new(make_runner());
            let topics: Vec<String> = engine
                .registry
                .summaries()
                .iter()
                .map(|summary| {
                    run_topic(summary.provider_slug.as_str(), summary.diagnostic_slug.as_str())
                })
                .collect();
            let stop = Arc::new(AtomicBool::new(false));
            let worker_count = settings.pool_size.unwrap_or(1).max(1);
            let max_redeliveries = settings
                .max_redeliveries
                .unwrap_or(climate_eval_executor::DEFAULT_MAX_REDELIVERIES);
            let mut handles = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                let worker = QueueWorker::new(
                    Arc::clone(&broker) as Arc<dyn climate_eval_executor::MessageQueue>,
                    Arc::clone(&shared_runner),
                    topics.clone(),
                    max_redeliveries,
                );
                let stop = Arc::clone(&stop);
                let handle = thread::Builder::new()
                    .name("eval-queue-worker".to_string())
                    .spawn(move || {
                        while !stop.load(Ordering::SeqCst) {
                            if worker.run_once(QUEUE_POLL_TIMEOUT).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(cli_err)?;
                handles.push(handle);
            }
            worker_guard = Some(QueueWorkerGuard {
                stop,
                handles,
            });
            Box::new(QueueExecutor::new(
                broker as Arc<dyn climate_eval_executor::MessageQueue>,
                shared_runner,
            ))
        }
        ExecutorKind::HpcBatch => {
            let scheduler: Arc<dyn climate_eval_executor::BatchScheduler> =
                match settings.scheduler.as_deref() {
                    Some("pbs") => Arc::new(PbsScheduler {
                        qsub_args: settings.scheduler_args.clone(),
                    }),
                    _ => Arc::new(SlurmScheduler {
                        sbatch_args: settings.scheduler_args.clone(),
                    }),
                };
            if settings.worker_command.is_empty() {
                return Err(CliError::new(
                    "executor.config.worker_command is required for the batch executor",
                ));
            }
            let log_root = config
                .paths
                .log
                .clone()
                .ok_or_else(|| CliError::new("paths.log is unset"))?;
            Box::new(HpcBatchExecutor::new(
                scheduler,
                Arc::new(make_runner()),
                settings.worker_command.clone(),
                log_root,
                Duration::from_secs(settings.poll_interval_secs.unwrap_or(10)),
            ))
        }
    };

    for execution_id in &execution_ids {
        executor.submit(*execution_id).map_err(cli_err)?;
    }
    let mut summary = executor.join(timeout).map_err(cli_err)?;
    if summary.timed_out {
        // Budget exceeded: cancel whatever is still outstanding.
        for execution in engine.store.pending_executions().map_err(cli_err)? {
            executor.cancel(execution.id).map_err(cli_err)?;
            summary.cancelled += 1;
        }
        info!("wall-clock budget exceeded; outstanding executions cancelled");
    }
    drop(worker_guard);
    Ok(summary)
}

/// Executor variant selected by fully-qualified name.
enum ExecutorKind {
    /// Inline synchronous execution.
    Synchronous,
    /// Bounded local thread pool.
    LocalPool,
    /// Broker-backed queue.
    Queue,
    /// Cluster batch scheduler.
    HpcBatch,
}

/// Maps a fully-qualified executor name to its variant.
fn executor_kind(name: &str) -> ExecutorKind {
    if name.ends_with("SynchronousExecutor") {
        ExecutorKind::Synchronous
    } else if name.ends_with("QueueExecutor") {
        ExecutorKind::Queue
    } else if name.ends_with("HpcBatchExecutor") {
        ExecutorKind::HpcBatch
    } else {
        ExecutorKind::LocalPool
    }
}

// ============================================================================
// SECTION: Inspection Commands
// ============================================================================

/// Runs the `list-execution-groups` subcommand.
fn command_list_groups(engine: &Engine, command: &ListGroupsCommand) -> CliResult<ExitCode> {
    let filter = GroupFilter {
        provider: command.provider.clone(),
        diagnostic: command.diagnostic.clone(),
        dirty_only: command.dirty_only,
    };
    let groups = engine.store.list_groups(&filter).map_err(cli_err)?;
    write_stdout_line("id\tprovider\tdiagnostic\tgroup_key\tdirty\tstale").map_err(cli_err)?;
    for group in groups {
        write_stdout_line(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            group.id,
            group.provider_slug,
            group.diagnostic_slug,
            group.group_key,
            group.dirty,
            group.stale
        ))
        .map_err(cli_err)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs the `inspect-execution` subcommand.
fn command_inspect(engine: &Engine, command: &InspectCommand) -> CliResult<ExitCode> {
    let execution_id = ExecutionId::from_raw(command.execution_id)
        .ok_or_else(|| CliError::new("execution id must be >= 1"))?;
    let execution = engine.store.execution(execution_id).map_err(cli_err)?;
    let group = engine.store.group(execution.group_id).map_err(cli_err)?;

    write_stdout_line(&format!("execution {execution_id}")).map_err(cli_err)?;
    write_stdout_line(&format!(
        "  diagnostic: {}/{}",
        group.provider_slug, group.diagnostic_slug
    ))
    .map_err(cli_err)?;
    write_stdout_line(&format!("  group: {}", group.group_key)).map_err(cli_err)?;
    write_stdout_line(&format!("  status: {}", execution.status)).map_err(cli_err)?;
    write_stdout_line(&format!("  dataset_hash: {}", execution.dataset_hash)).map_err(cli_err)?;
    write_stdout_line(&format!("  retries: {}", execution.retry_count)).map_err(cli_err)?;
    if let Some(reason) = &execution.failure_reason {
        write_stdout_line(&format!("  failure: {reason}")).map_err(cli_err)?;
    }
    if let Some(directory) = &execution.output_directory {
        write_stdout_line(&format!("  outputs: {}", directory.display())).map_err(cli_err)?;
    }

    for input in engine.store.execution_inputs(execution_id).map_err(cli_err)? {
        let dataset = engine.store.dataset_with_files(input.dataset_id).map_err(cli_err)?;
        write_stdout_line(&format!(
            "  input: {} @ {}",
            dataset.dataset.record.instance_id, input.version
        ))
        .map_err(cli_err)?;
    }
    for output in engine.store.execution_outputs(execution_id).map_err(cli_err)? {
        write_stdout_line(&format!(
            "  output [{}]: {}",
            output.entry.kind,
            output.entry.relative_path.display()
        ))
        .map_err(cli_err)?;
    }
    for value in engine.store.metric_values(execution_id).map_err(cli_err)? {
        let facets: Vec<String> =
            value.facets.iter().map(|(name, facet)| format!("{name}={facet}")).collect();
        write_stdout_line(&format!("  metric [{}]: {}", facets.join(","), value.value))
            .map_err(cli_err)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs the `retry-execution` subcommand.
fn command_retry(engine: &Engine, command: &RetryCommand) -> CliResult<ExitCode> {
    let execution_id = ExecutionId::from_raw(command.execution_id)
        .ok_or_else(|| CliError::new("execution id must be >= 1"))?;
    engine.store.retry_execution(execution_id).map_err(cli_err)?;
    let execution = engine.store.execution(execution_id).map_err(cli_err)?;
    write_stdout_line(&format!(
        "execution {execution_id} is {} (retry #{})",
        execution.status, execution.retry_count
    ))
    .map_err(cli_err)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ingest_defaults_to_skipping_invalid_files() {
        let cli = Cli::parse_from(["climate-eval", "ingest", "/data/cmip6"]);
        let Commands::Ingest(command) = cli.command else {
            panic!("expected ingest");
        };
        assert!(command.skip_invalid);
        assert_eq!(command.source_type, "cmip6");
    }

    #[test]
    fn solve_flags_parse() {
        let cli = Cli::parse_from([
            "climate-eval",
            "solve",
            "--provider",
            "example",
            "--timeout",
            "600",
            "--one-per-provider",
            "--dry-run",
        ]);
        let Commands::Solve(command) = cli.command else {
            panic!("expected solve");
        };
        assert_eq!(command.provider.as_deref(), Some("example"));
        assert_eq!(command.timeout, Some(600));
        assert!(command.one_per_provider);
        assert!(command.dry_run);
    }

    #[test]
    fn executor_kinds_resolve_from_fully_qualified_names() {
        assert!(matches!(
            executor_kind("climate_eval_executor::sync::SynchronousExecutor"),
            ExecutorKind::Synchronous
        ));
        assert!(matches!(
            executor_kind("climate_eval_executor::queue::QueueExecutor"),
            ExecutorKind::Queue
        ));
        assert!(matches!(
            executor_kind("climate_eval_executor::batch::HpcBatchExecutor"),
            ExecutorKind::HpcBatch
        ));
        assert!(matches!(
            executor_kind("climate_eval_executor::pool::LocalPoolExecutor"),
            ExecutorKind::LocalPool
        ));
    }
}
