// crates/climate-eval-executor/src/batch.rs
// ============================================================================
// Module: HPC Batch Executor
// Description: Job-scheduler-backed executor for cluster deployments.
// Purpose: Translate submissions into scheduler jobs and poll their state.
// Dependencies: climate-eval-core, crate::runner
// ============================================================================

//! ## Overview
//! The batch executor translates each submission into a scheduler job that
//! runs a configured worker command with the execution id appended; the
//! worker process drives the shared runner on the compute node and records
//! results through the store. The master process polls job state and settles
//! executions whose job reached a terminal state without the worker claiming
//! or finishing them. The [`BatchScheduler`] trait targets at least Slurm and
//! PBS through command-line adapters; both are thin enough that tests drive
//! the executor with an in-memory scheduler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use climate_eval_core::ExecutionId;
use climate_eval_core::ExecutionStatus;
use climate_eval_core::Executor;
use climate_eval_core::ExecutorError;
use climate_eval_core::ExecutorSummary;
use climate_eval_core::StoreError;
use climate_eval_core::Submission;
use climate_eval_core::Timestamp;
use tracing::debug;
use tracing::warn;

use crate::runner::ExecutionRunner;

// ============================================================================
// SECTION: Scheduler Contract
// ============================================================================

/// Opaque scheduler job identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobId(pub String);

/// Scheduler-visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the scheduler queue.
    Queued,
    /// Executing on a node.
    Running,
    /// Terminated; exit status unknown to the scheduler adapter.
    Completed,
    /// Terminated abnormally (node failure, scheduler kill).
    Failed,
}

/// One job submission handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    /// Scheduler-visible job name.
    pub name: String,
    /// Command line executed on the node.
    pub command: Vec<String>,
    /// File the scheduler writes combined output into.
    pub log_path: PathBuf,
}

/// Generic job-submission abstraction over cluster schedulers.
pub trait BatchScheduler: Send + Sync {
    /// Submits a job, returning its scheduler identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Infrastructure`] when submission fails.
    fn submit(&self, job: &BatchJob) -> Result<JobId, ExecutorError>;

    /// Polls the current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Infrastructure`] when the scheduler cannot
    /// be queried.
    fn poll(&self, job: &JobId) -> Result<JobState, ExecutorError>;

    /// Requests best-effort cancellation of a job.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Infrastructure`] when the request fails.
    fn cancel(&self, job: &JobId) -> Result<(), ExecutorError>;
}

// ============================================================================
// SECTION: Slurm Adapter
// ============================================================================

/// Slurm command-line scheduler adapter.
#[derive(Debug, Clone, Default)]
pub struct SlurmScheduler {
    /// Extra arguments inserted into every `sbatch` call (partition,
    /// account).
    pub sbatch_args: Vec<String>,
}

impl SlurmScheduler {
    /// Builds the `sbatch` argument vector for a job.
    #[must_use]
    pub fn submit_args(&self, job: &BatchJob) -> Vec<String> {
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name={}", job.name),
            format!("--output={}", job.log_path.display()),
        ];
        args.extend(self.sbatch_args.iter().cloned());
        args.push(format!("--wrap={}", shell_join(&job.command)));
        args
    }
}

impl BatchScheduler for SlurmScheduler {
    fn submit(&self, job: &BatchJob) -> Result<JobId, ExecutorError> {
        let output = Command::new("sbatch")
            .args(self.submit_args(job))
            .output()
            .map_err(|err| ExecutorError::Infrastructure(format!("sbatch failed: {err}")))?;
        if !output.status.success() {
            return Err(ExecutorError::Infrastructure(format!(
                "sbatch exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout.split(';').next().unwrap_or("").trim().to_string();
        if job_id.is_empty() {
            return Err(ExecutorError::Infrastructure("sbatch returned no job id".to_string()));
        }
        Ok(JobId(job_id))
    }

    fn poll(&self, job: &JobId) -> Result<JobState, ExecutorError> {
        let output = Command::new("squeue")
            .args(["-h", "-j", job.0.as_str(), "-o", "%T"])
            .output()
            .map_err(|err| ExecutorError::Infrastructure(format!("squeue failed: {err}")))?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_uppercase();
        Ok(match state.as_str() {
            "PENDING" | "CONFIGURING" => JobState::Queued,
            "RUNNING" | "COMPLETING" => JobState::Running,
            "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" => JobState::Failed,
            // Absent from the queue: the job reached a terminal state.
            _ => JobState::Completed,
        })
    }

    fn cancel(&self, job: &JobId) -> Result<(), ExecutorError> {
        Command::new("scancel")
            .arg(job.0.as_str())
            .status()
            .map_err(|err| ExecutorError::Infrastructure(format!("scancel failed: {err}")))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: PBS Adapter
// ============================================================================

/// PBS command-line scheduler adapter.
#[derive(Debug, Clone, Default)]
pub struct PbsScheduler {
    /// Extra arguments inserted into every `qsub` call (queue, project).
    pub qsub_args: Vec<String>,
}

impl PbsScheduler {
    /// Builds the `qsub` argument vector for a job.
    #[must_use]
    pub fn submit_args(&self, job: &BatchJob) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            job.name.clone(),
            "-j".to_string(),
            "oe".to_string(),
            "-o".to_string(),
            job.log_path.display().to_string(),
        ];
        args.extend(self.qsub_args.iter().cloned());
        args.push("--".to_string());
        args.extend(job.command.iter().cloned());
        args
    }
}

impl BatchScheduler for PbsScheduler {
    fn submit(&self, job: &BatchJob) -> Result<JobId, ExecutorError> {
        let output = Command::new("qsub")
            .args(self.submit_args(job))
            .output()
            .map_err(|err| ExecutorError::Infrastructure(format!("qsub failed: {err}")))?;
        if !output.status.success() {
            return Err(ExecutorError::Infrastructure(format!(
                "qsub exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if job_id.is_empty() {
            return Err(ExecutorError::Infrastructure("qsub returned no job id".to_string()));
        }
        Ok(JobId(job_id))
    }

    fn poll(&self, job: &JobId) -> Result<JobState, ExecutorError> {
        let output = Command::new("qstat")
            .args(["-f", job.0.as_str()])
            .output()
            .map_err(|err| ExecutorError::Infrastructure(format!("qstat failed: {err}")))?;
        if !output.status.success() {
            // Unknown job id: PBS forgets finished jobs.
            return Ok(JobState::Completed);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("job_state = "))
            .unwrap_or("")
            .trim();
        Ok(match state {
            "Q" | "H" | "W" => JobState::Queued,
            "R" | "E" => JobState::Running,
            "F" => JobState::Completed,
            _ => JobState::Completed,
        })
    }

    fn cancel(&self, job: &JobId) -> Result<(), ExecutorError> {
        Command::new("qdel")
            .arg(job.0.as_str())
            .status()
            .map_err(|err| ExecutorError::Infrastructure(format!("qdel failed: {err}")))?;
        Ok(())
    }
}

/// Joins command words for a shell `--wrap` payload, quoting arguments with
/// whitespace.
fn shell_join(command: &[String]) -> String {
    command
        .iter()
        .map(|word| {
            if word.chars().any(char::is_whitespace) {
                format!("'{}'", word.replace('\'', "'\\''"))
            } else {
                word.clone()
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ============================================================================
// SECTION: Batch Executor
// ============================================================================

/// Executor translating submissions into scheduler jobs.
pub struct HpcBatchExecutor {
    /// Scheduler backend.
    scheduler: Arc<dyn BatchScheduler>,
    /// Store access for settlement and cancellation.
    runner: Arc<ExecutionRunner>,
    /// Worker command the execution id is appended to.
    worker_command: Vec<String>,
    /// Directory scheduler logs are written into.
    log_root: PathBuf,
    /// Poll interval for job state.
    poll_interval: Duration,
    /// Outstanding jobs keyed by execution.
    jobs: Mutex<BTreeMap<ExecutionId, JobId>>,
    /// Accumulated summary since the last join.
    summary: Mutex<ExecutorSummary>,
}

impl HpcBatchExecutor {
    /// Creates a batch executor over the given scheduler.
    #[must_use]
    pub fn new(
        scheduler: Arc<dyn BatchScheduler>,
        runner: Arc<ExecutionRunner>,
        worker_command: Vec<String>,
        log_root: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            runner,
            worker_command,
            log_root: log_root.into(),
            poll_interval,
            jobs: Mutex::new(BTreeMap::new()),
            summary: Mutex::new(ExecutorSummary::default()),
        }
    }

    /// Locks a mutex, converting poisoning into an executor error.
    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>, ExecutorError> {
        mutex
            .lock()
            .map_err(|_| ExecutorError::Infrastructure("batch mutex poisoned".to_string()))
    }

    /// Settles one execution after its job reached a terminal state.
    fn settle(&self, execution_id: ExecutionId, job_state: JobState) -> Result<(), ExecutorError> {
        let execution = self.runner.store().execution(execution_id)?;
        let mut summary = Self::lock(&self.summary)?;
        match execution.status {
            ExecutionStatus::Succeeded => summary.succeeded += 1,
            ExecutionStatus::Failed => summary.failed += 1,
            ExecutionStatus::Cancelled => summary.cancelled += 1,
            ExecutionStatus::Running => {
                drop(summary);
                let reason = match job_state {
                    JobState::Failed => "batch job failed",
                    _ => "lost worker",
                };
                self.runner.store().transition_execution(
                    execution_id,
                    ExecutionStatus::Running,
                    ExecutionStatus::Failed,
                    Timestamp::now(),
                    Some(reason),
                )?;
                Self::lock(&self.summary)?.failed += 1;
            }
            ExecutionStatus::Pending => {
                drop(summary);
                self.runner.store().transition_execution(
                    execution_id,
                    ExecutionStatus::Pending,
                    ExecutionStatus::Cancelled,
                    Timestamp::now(),
                    Some("batch job exited without claiming the execution"),
                )?;
                Self::lock(&self.summary)?.failed += 1;
            }
        }
        Ok(())
    }
}

impl Executor for HpcBatchExecutor {
    fn submit(&self, execution_id: ExecutionId) -> Result<Submission, ExecutorError> {
        let mut command = self.worker_command.clone();
        command.push(execution_id.to_string());
        let job = BatchJob {
            name: format!("climate-eval-{execution_id}"),
            command,
            log_path: self.log_root.join(format!("exec-{execution_id}.log")),
        };
        let job_id = self.scheduler.submit(&job)?;
        debug!(execution = %execution_id, job = %job_id.0, "submitted batch job");
        Self::lock(&self.jobs)?.insert(execution_id, job_id);
        Self::lock(&self.summary)?.submitted += 1;
        Ok(Submission {
            execution_id,
        })
    }

    fn join(&self, timeout: Option<Duration>) -> Result<ExecutorSummary, ExecutorError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let pending: Vec<(ExecutionId, JobId)> = Self::lock(&self.jobs)?
                .iter()
                .map(|(execution_id, job_id)| (*execution_id, job_id.clone()))
                .collect();
            if pending.is_empty() {
                let mut summary = Self::lock(&self.summary)?;
                let mut result = *summary;
                *summary = ExecutorSummary::default();
                result.timed_out = false;
                return Ok(result);
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                let mut summary = Self::lock(&self.summary)?;
                let mut result = *summary;
                *summary = ExecutorSummary::default();
                result.timed_out = true;
                return Ok(result);
            }

            for (execution_id, job_id) in pending {
                match self.scheduler.poll(&job_id)? {
                    JobState::Queued | JobState::Running => {}
                    state @ (JobState::Completed | JobState::Failed) => {
                        self.settle(execution_id, state)?;
                        Self::lock(&self.jobs)?.remove(&execution_id);
                    }
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn cancel(&self, execution_id: ExecutionId) -> Result<(), ExecutorError> {
        if let Some(job_id) = Self::lock(&self.jobs)?.get(&execution_id).cloned()
            && let Err(err) = self.scheduler.cancel(&job_id)
        {
            warn!(execution = %execution_id, error = %err, "batch cancel failed");
        }
        match self.runner.store().transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Cancelled,
            Timestamp::now(),
            None,
        ) {
            Ok(()) | Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(ExecutorError::Store(err)),
        }
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

    fn job() -> BatchJob {
        BatchJob {
            name: "climate-eval-7".to_string(),
            command: vec![
                "climate-eval-worker".to_string(),
                "--run".to_string(),
                "7".to_string(),
            ],
            log_path: PathBuf::from("/logs/exec-7.log"),
        }
    }

    #[test]
    fn slurm_submit_args_wrap_the_worker_command() {
        let scheduler = SlurmScheduler {
            sbatch_args: vec!["--partition=compute".to_string()],
        };
        let args = scheduler.submit_args(&job());
        assert_eq!(args[0], "--parsable");
        assert!(args.contains(&"--job-name=climate-eval-7".to_string()));
        assert!(args.contains(&"--output=/logs/exec-7.log".to_string()));
        assert!(args.contains(&"--partition=compute".to_string()));
        assert_eq!(args.last().unwrap(), "--wrap=climate-eval-worker --run 7");
    }

    #[test]
    fn pbs_submit_args_pass_the_worker_command() {
        let scheduler = PbsScheduler::default();
        let args = scheduler.submit_args(&job());
        assert_eq!(&args[0..2], &["-N".to_string(), "climate-eval-7".to_string()]);
        assert!(args.contains(&"--".to_string()));
        assert_eq!(args.last().unwrap(), "7");
    }

    #[test]
    fn shell_join_quotes_whitespace() {
        let joined = shell_join(&[
            "run".to_string(),
            "a b".to_string(),
        ]);
        assert_eq!(joined, "run 'a b'");
    }
}
