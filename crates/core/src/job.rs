//! Job record, lifecycle states and enqueue payload validation.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::error::{DomainError, DomainResult};
use crate::id::{JobId, WorkerId};

/// Lifecycle state of a job.
///
/// `pending -> processing -> {completed | pending (retry) | dead}`; `dead`
/// only leaves through an explicit requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::invalid_state(format!("unknown job state: {s}")))
    }
}

/// A unit of work: one shell command plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// Failed executions so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest instant at which the job may be claimed.
    pub run_at: DateTime<Utc>,
    /// Set only while `state == processing`.
    pub worker_id: Option<WorkerId>,
    /// Output captured by the most recent execution.
    pub output: Option<String>,
}

impl Job {
    /// Build the initial `pending` row for a validated request.
    pub fn new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: new_job.id,
            command: new_job.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: new_job.max_retries,
            created_at: now,
            updated_at: now,
            run_at: now,
            worker_id: None,
            output: None,
        }
    }

    /// Claimable at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at <= now
    }

    /// Transition `pending -> processing` on behalf of `worker_id`.
    pub fn claim(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> DomainResult<()> {
        if self.state != JobState::Pending {
            return Err(DomainError::InvalidTransition {
                action: "claim",
                from: self.state,
            });
        }
        self.state = JobState::Processing;
        self.worker_id = Some(worker_id);
        self.updated_at = now;
        Ok(())
    }

    /// Administrative DLQ retry: `dead -> pending` with a fresh attempt budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.state != JobState::Dead {
            return Err(DomainError::InvalidTransition {
                action: "requeue",
                from: self.state,
            });
        }
        self.state = JobState::Pending;
        self.attempts = 0;
        self.run_at = now;
        self.updated_at = now;
        Ok(())
    }
}

/// A validated enqueue request, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub id: JobId,
    pub command: String,
    pub max_retries: u32,
}

/// Raw enqueue payload as submitted by a producer, e.g.
/// `{"id": "job-1", "command": "echo hi", "max_retries": 5}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueRequest {
    pub id: Option<String>,
    pub command: Option<String>,
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    pub fn from_json(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("invalid job JSON: {e}")))
    }

    /// Validate the payload, filling unset fields from `config`.
    pub fn into_new_job(self, config: &QueueConfig) -> DomainResult<NewJob> {
        let command = match self.command {
            Some(command) if !command.trim().is_empty() => command,
            _ => return Err(DomainError::validation("the \"command\" field is required")),
        };

        let id = match self.id {
            Some(raw) => JobId::parse(&raw)?,
            None => JobId::generate(),
        };

        let max_retries = self.max_retries.unwrap_or(config.max_retries);
        if max_retries == 0 {
            return Err(DomainError::validation(
                "max_retries must be a positive integer",
            ));
        }

        Ok(NewJob {
            id,
            command,
            max_retries,
        })
    }
}
