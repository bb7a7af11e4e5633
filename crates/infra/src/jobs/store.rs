//! Job store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use queuectl_core::{
    DomainError, Job, JobId, JobState, NewJob, Transition, WorkerId, WorkerRecord, WorkerStatus,
};

/// Durable queue state shared by producers and workers.
///
/// Implementations must make `claim_next` and `finalize` indivisible: the
/// eligibility check and the write happen as one step, so that at most one of
/// several concurrent claimants wins a given job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Atomically move the oldest eligible `pending` job to `processing` for
    /// `worker_id` and return it. `None` when nothing is eligible.
    async fn claim_next(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError>;

    /// Apply a finalize transition to a job still held by `job.worker_id`.
    ///
    /// Returns `false` (and changes nothing) when the job is no longer
    /// `processing` under that worker.
    async fn finalize(&self, job: &Job, transition: &Transition) -> Result<bool, StoreError>;

    /// Jobs in `state`, oldest first.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError>;

    /// Dead jobs, most recently updated first.
    async fn list_dead_letters(&self) -> Result<Vec<Job>, StoreError>;

    /// Move a dead job back to `pending` with `attempts = 0`, eligible now.
    async fn retry_dead_letter(&self, job_id: &JobId) -> Result<Job, StoreError>;

    /// Counts of jobs by state and workers by status.
    async fn status_summary(&self) -> Result<StatusSummary, StoreError>;

    async fn register_worker(
        &self,
        worker_id: WorkerId,
        pid: u32,
    ) -> Result<WorkerRecord, StoreError>;

    async fn remove_worker(&self, worker_id: WorkerId) -> Result<(), StoreError>;

    async fn worker_status(&self, worker_id: WorkerId)
    -> Result<Option<WorkerStatus>, StoreError>;

    /// Flag every `running` worker as `stopping`; returns how many were flagged.
    async fn stop_all_workers(&self) -> Result<u64, StoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    DuplicateId(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Queue overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub jobs: JobCounts,
    pub workers: WorkerCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
}

impl JobCounts {
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Processing => self.processing += count,
            JobState::Completed => self.completed += count,
            JobState::Dead => self.dead += count,
        }
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Dead => self.dead,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.dead
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub running: u64,
    pub stopping: u64,
}

impl WorkerCounts {
    pub fn add(&mut self, status: WorkerStatus, count: u64) {
        match status {
            WorkerStatus::Running => self.running += count,
            WorkerStatus::Stopping => self.stopping += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.running + self.stopping
    }
}

/// In-memory job store for tests and embedding.
///
/// Jobs are kept in insertion order so FIFO ties on `created_at` resolve the
/// same way the SQLite store resolves them.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<Job>,
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        let mut state = self.lock()?;
        if state.jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::DuplicateId(job.id));
        }
        let job = Job::new(job, Utc::now());
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let state = self.lock()?;
        Ok(state.jobs.iter().find(|j| &j.id == job_id).cloned())
    }

    async fn claim_next(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        // The guard spans selection and update.
        let mut state = self.lock()?;
        let now = Utc::now();

        let Some(job) = state
            .jobs
            .iter_mut()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| j.created_at)
        else {
            return Ok(None);
        };

        job.claim(worker_id, now)?;
        Ok(Some(job.clone()))
    }

    async fn finalize(&self, job: &Job, transition: &Transition) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(stored) = state.jobs.iter_mut().find(|j| j.id == job.id) else {
            return Ok(false);
        };
        if stored.state != JobState::Processing || stored.worker_id != job.worker_id {
            return Ok(false);
        }
        transition.apply(stored, Utc::now());
        Ok(true)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        let guard = self.lock()?;
        let mut result: Vec<_> = guard
            .jobs
            .iter()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }

    async fn list_dead_letters(&self) -> Result<Vec<Job>, StoreError> {
        let mut result = self.list_by_state(JobState::Dead).await?;
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(result)
    }

    async fn retry_dead_letter(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| &j.id == job_id && j.state == JobState::Dead)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        job.requeue(Utc::now())?;
        Ok(job.clone())
    }

    async fn status_summary(&self) -> Result<StatusSummary, StoreError> {
        let state = self.lock()?;
        let mut summary = StatusSummary::default();
        for job in &state.jobs {
            summary.jobs.add(job.state, 1);
        }
        for worker in state.workers.values() {
            summary.workers.add(worker.status, 1);
        }
        Ok(summary)
    }

    async fn register_worker(
        &self,
        worker_id: WorkerId,
        pid: u32,
    ) -> Result<WorkerRecord, StoreError> {
        let mut state = self.lock()?;
        if state.workers.contains_key(&worker_id) {
            return Err(StoreError::Storage(format!(
                "worker already registered: {worker_id}"
            )));
        }
        let record = WorkerRecord::new(worker_id, pid, Utc::now());
        state.workers.insert(worker_id, record.clone());
        Ok(record)
    }

    async fn remove_worker(&self, worker_id: WorkerId) -> Result<(), StoreError> {
        self.lock()?.workers.remove(&worker_id);
        Ok(())
    }

    async fn worker_status(
        &self,
        worker_id: WorkerId,
    ) -> Result<Option<WorkerStatus>, StoreError> {
        Ok(self.lock()?.workers.get(&worker_id).map(|w| w.status))
    }

    async fn stop_all_workers(&self) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut flagged = 0;
        for worker in state.workers.values_mut() {
            if worker.status == WorkerStatus::Running {
                worker.status = WorkerStatus::Stopping;
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(job_id).await
    }

    async fn claim_next(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        (**self).claim_next(worker_id).await
    }

    async fn finalize(&self, job: &Job, transition: &Transition) -> Result<bool, StoreError> {
        (**self).finalize(job, transition).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        (**self).list_by_state(state).await
    }

    async fn list_dead_letters(&self) -> Result<Vec<Job>, StoreError> {
        (**self).list_dead_letters().await
    }

    async fn retry_dead_letter(&self, job_id: &JobId) -> Result<Job, StoreError> {
        (**self).retry_dead_letter(job_id).await
    }

    async fn status_summary(&self) -> Result<StatusSummary, StoreError> {
        (**self).status_summary().await
    }

    async fn register_worker(
        &self,
        worker_id: WorkerId,
        pid: u32,
    ) -> Result<WorkerRecord, StoreError> {
        (**self).register_worker(worker_id, pid).await
    }

    async fn remove_worker(&self, worker_id: WorkerId) -> Result<(), StoreError> {
        (**self).remove_worker(worker_id).await
    }

    async fn worker_status(
        &self,
        worker_id: WorkerId,
    ) -> Result<Option<WorkerStatus>, StoreError> {
        (**self).worker_status(worker_id).await
    }

    async fn stop_all_workers(&self) -> Result<u64, StoreError> {
        (**self).stop_all_workers().await
    }
}
