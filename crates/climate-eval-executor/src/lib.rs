// crates/climate-eval-executor/src/lib.rs
// ============================================================================
// Module: Climate Eval Executor Library
// Description: Execution backends sharing one lifecycle runner.
// Purpose: Expose the executor variants and the shared runner.
// Dependencies: crate::{runner, sync, pool, queue, batch}
// ============================================================================

//! ## Overview
//! Four executor variants over one shared per-execution runner: synchronous
//! (debugging), a bounded local thread pool, a broker-backed queue for
//! distributed workers, and a cluster batch adapter targeting Slurm and PBS.
//! No variant computes results itself; each invokes the provider's
//! diagnostic as an opaque unit and reports back through the store. On
//! startup, lost-worker recovery fails any running execution whose worker is
//! gone.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod batch;
pub mod pool;
pub mod queue;
pub mod runner;
pub mod sync;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use batch::BatchJob;
pub use batch::BatchScheduler;
pub use batch::HpcBatchExecutor;
pub use batch::JobId;
pub use batch::JobState;
pub use batch::PbsScheduler;
pub use batch::SlurmScheduler;
pub use pool::LocalPoolExecutor;
pub use queue::DEFAULT_MAX_REDELIVERIES;
pub use queue::InMemoryBroker;
pub use queue::MessageQueue;
pub use queue::QueueError;
pub use queue::QueueExecutor;
pub use queue::QueueWorker;
pub use queue::RESULT_TOPIC;
pub use queue::RunCompletion;
pub use queue::RunRequest;
pub use queue::run_topic;
pub use runner::CancellationToken;
pub use runner::ExecutionRunner;
pub use runner::RunOutcome;
pub use runner::RunnerConfig;
pub use runner::build_manifest;
pub use runner::recover_lost_workers;
pub use sync::SynchronousExecutor;
