//! Finalize transitions: (claimed job, execution result, policy) -> next state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::error::{DomainError, DomainResult};
use crate::job::{Job, JobState};

/// Outcome reported by the command executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Some(output.into()),
        }
    }
}

/// The single write that finalizes a processing job.
///
/// Every variant also clears `worker_id` and stores `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Complete {
        output: Option<String>,
    },
    Retry {
        attempts: u32,
        delay_secs: u64,
        run_at: DateTime<Utc>,
        output: Option<String>,
    },
    DeadLetter {
        attempts: u32,
        output: Option<String>,
    },
}

impl Transition {
    pub fn next_state(&self) -> JobState {
        match self {
            Transition::Complete { .. } => JobState::Completed,
            Transition::Retry { .. } => JobState::Pending,
            Transition::DeadLetter { .. } => JobState::Dead,
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            Transition::Complete { output }
            | Transition::Retry { output, .. }
            | Transition::DeadLetter { output, .. } => output.as_deref(),
        }
    }

    /// Apply to an in-memory copy of the job.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) {
        job.state = self.next_state();
        job.worker_id = None;
        job.updated_at = now;
        job.output = self.output().map(str::to_string);
        match self {
            Transition::Complete { .. } => {}
            Transition::Retry {
                attempts, run_at, ..
            } => {
                job.attempts = *attempts;
                job.run_at = *run_at;
            }
            Transition::DeadLetter { attempts, .. } => job.attempts = *attempts,
        }
    }
}

/// Decide how a claimed job leaves `processing`.
///
/// Completed and dead jobs are never finalized again; only `processing` jobs
/// are accepted.
pub fn finalize(
    job: &Job,
    result: ExecutionResult,
    policy: &BackoffPolicy,
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    if job.state != JobState::Processing {
        return Err(DomainError::InvalidTransition {
            action: "finalize",
            from: job.state,
        });
    }

    if result.success {
        return Ok(Transition::Complete {
            output: result.output,
        });
    }

    let attempts = job.attempts.saturating_add(1);
    if policy.is_exhausted(attempts, job.max_retries) {
        return Ok(Transition::DeadLetter {
            attempts,
            output: result.output,
        });
    }

    Ok(Transition::Retry {
        attempts,
        delay_secs: policy.delay_secs(attempts),
        run_at: policy.retry_at(attempts, now),
        output: result.output,
    })
}
