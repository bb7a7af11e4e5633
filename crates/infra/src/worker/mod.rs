//! Worker lifecycle and poll loop.
//!
//! A worker is one process-level identity: it registers itself, repeatedly
//! claims, executes and finalizes one job at a time, and deregisters on the
//! way out. Shutdown is cooperative and only observed between jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use queuectl_core::{BackoffPolicy, Job, QueueConfig, Transition, WorkerId, WorkerStatus};

use crate::jobs::{CommandExecutor, FinalizeOutcome, JobStore, StoreError, finalize_job};

/// Worker tuning taken from the queue configuration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Idle wait when no job is eligible.
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            backoff: BackoffPolicy::from_config(config),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to register worker: {0}")]
    Register(#[source] StoreError),
    #[error("failed to deregister worker: {0}")]
    Deregister(#[source] StoreError),
}

/// What a worker did during its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Jobs left in `processing` because the finalize write failed.
    pub finalize_failures: u64,
}

impl WorkerSummary {
    fn record(&mut self, transition: &Transition) {
        match transition {
            Transition::Complete { .. } => self.completed += 1,
            Transition::Retry { .. } => self.retried += 1,
            Transition::DeadLetter { .. } => self.dead_lettered += 1,
        }
    }
}

enum Poll {
    Processed,
    Idle,
}

/// One worker identity bound to a store and an executor.
pub struct Worker<S, E> {
    id: WorkerId,
    pid: u32,
    store: S,
    executor: E,
    settings: WorkerSettings,
    shutdown: CancellationToken,
    busy: AtomicBool,
}

impl<S: JobStore, E: CommandExecutor> Worker<S, E> {
    pub fn new(store: S, executor: E, settings: WorkerSettings) -> Self {
        Self {
            id: WorkerId::new(),
            pid: std::process::id(),
            store,
            executor,
            settings,
            shutdown: CancellationToken::new(),
            busy: AtomicBool::new(false),
        }
    }

    /// Use `token` as the shutdown flag (e.g. one cancelled by a signal handler).
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Handle that requests shutdown at the next loop boundary when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Whether a claim/execute/finalize sequence is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Register, poll until asked to stop, then deregister.
    ///
    /// Deregistration runs however the loop ended. Only registration and
    /// deregistration failures are errors; job-level failures never end the
    /// loop.
    pub async fn run(&self) -> Result<WorkerSummary, WorkerError> {
        self.store
            .register_worker(self.id, self.pid)
            .await
            .map_err(WorkerError::Register)?;
        info!(worker_id = %self.id, pid = self.pid, "worker started; polling for jobs");

        let summary = self.poll_loop().await;

        self.store
            .remove_worker(self.id)
            .await
            .map_err(WorkerError::Deregister)?;
        info!(
            worker_id = %self.id,
            claimed = summary.claimed,
            completed = summary.completed,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "worker stopped"
        );

        Ok(summary)
    }

    async fn poll_loop(&self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();

        while !self.shutdown.is_cancelled() {
            if self.stop_requested().await {
                self.shutdown.cancel();
                break;
            }

            match self.poll_once(&mut summary).await {
                Poll::Processed => {}
                Poll::Idle => self.idle().await,
            }
        }

        info!(worker_id = %self.id, "shutdown requested; leaving poll loop");
        summary
    }

    async fn stop_requested(&self) -> bool {
        match self.store.worker_status(self.id).await {
            Ok(Some(WorkerStatus::Running)) => false,
            Ok(Some(WorkerStatus::Stopping)) => {
                info!(worker_id = %self.id, "stop signal received from store");
                true
            }
            Ok(None) => {
                warn!(worker_id = %self.id, "worker record disappeared; stopping");
                true
            }
            Err(e) => {
                // Same outage will surface again in the claim below.
                warn!(worker_id = %self.id, error = %e, "failed to read worker status");
                false
            }
        }
    }

    async fn poll_once(&self, summary: &mut WorkerSummary) -> Poll {
        self.busy.store(true, Ordering::SeqCst);
        let poll = match self.claim().await {
            Some(job) => {
                summary.claimed += 1;
                self.process(&job, summary).await;
                Poll::Processed
            }
            None => Poll::Idle,
        };
        self.busy.store(false, Ordering::SeqCst);
        poll
    }

    async fn claim(&self) -> Option<Job> {
        match self.store.claim_next(self.id).await {
            Ok(job) => job,
            Err(e) => {
                error!(worker_id = %self.id, error = %e, "failed to claim job");
                None
            }
        }
    }

    async fn process(&self, job: &Job, summary: &mut WorkerSummary) {
        info!(
            worker_id = %self.id,
            job_id = %job.id,
            command = %job.command,
            attempts = job.attempts,
            "claimed job"
        );

        let result = self.executor.execute(&job.command).await;
        debug!(job_id = %job.id, success = result.success, "command finished");

        match finalize_job(&self.store, job, result, &self.settings.backoff).await {
            Ok(FinalizeOutcome::Applied(transition)) => summary.record(&transition),
            Ok(FinalizeOutcome::Skipped) => {}
            Err(e) => {
                summary.finalize_failures += 1;
                error!(
                    critical = true,
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %e,
                    "failed to record job outcome; job remains in processing"
                );
            }
        }
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
        }
    }
}
