//! FinalizeJob: state machine decision plus the single store write.

use chrono::Utc;
use tracing::{info, warn};

use queuectl_core::state_machine;
use queuectl_core::{BackoffPolicy, ExecutionResult, Job, Transition};

use super::store::{JobStore, StoreError};

/// What happened to a finalize request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Applied(Transition),
    /// The job was not `processing` under the caller; nothing was written.
    Skipped,
}

/// Move a claimed job out of `processing` according to `result`.
///
/// Store failures are returned to the caller untouched: a finalize is never
/// retried here, because the command has already run.
pub async fn finalize_job<S: JobStore + ?Sized>(
    store: &S,
    job: &Job,
    result: ExecutionResult,
    policy: &BackoffPolicy,
) -> Result<FinalizeOutcome, StoreError> {
    let transition = match state_machine::finalize(job, result, policy, Utc::now()) {
        Ok(transition) => transition,
        Err(err) => {
            warn!(job_id = %job.id, error = %err, "finalize skipped");
            return Ok(FinalizeOutcome::Skipped);
        }
    };

    if !store.finalize(job, &transition).await? {
        warn!(job_id = %job.id, "job no longer held by this worker; finalize skipped");
        return Ok(FinalizeOutcome::Skipped);
    }

    match &transition {
        Transition::Complete { .. } => info!(job_id = %job.id, "job completed"),
        Transition::Retry {
            attempts,
            delay_secs,
            ..
        } => info!(
            job_id = %job.id,
            attempts,
            delay_secs,
            "job failed; retry scheduled"
        ),
        Transition::DeadLetter { attempts, .. } => {
            warn!(job_id = %job.id, attempts, "job failed permanently; moved to DLQ")
        }
    }

    Ok(FinalizeOutcome::Applied(transition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use queuectl_core::{EnqueueRequest, JobState, QueueConfig, WorkerId};

    async fn claimed(store: &InMemoryJobStore, json: &str) -> Job {
        let new_job = EnqueueRequest::from_json(json)
            .unwrap()
            .into_new_job(&QueueConfig::default())
            .unwrap();
        store.enqueue(new_job).await.unwrap();
        store.claim_next(WorkerId::new()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn success_is_applied() {
        let store = InMemoryJobStore::new();
        let job = claimed(&store, r#"{"command":"echo hi"}"#).await;

        let outcome = finalize_job(
            &store,
            &job,
            ExecutionResult::success("hi"),
            &BackoffPolicy::default(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, FinalizeOutcome::Applied(Transition::Complete { .. })));
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
    }

    #[tokio::test]
    async fn second_finalize_is_skipped() {
        let store = InMemoryJobStore::new();
        let job = claimed(&store, r#"{"command":"exit 1","max_retries":1}"#).await;
        let policy = BackoffPolicy::default();

        let first = finalize_job(&store, &job, ExecutionResult::failure("x"), &policy)
            .await
            .unwrap();
        assert!(matches!(first, FinalizeOutcome::Applied(Transition::DeadLetter { .. })));

        let second = finalize_job(&store, &job, ExecutionResult::success("y"), &policy)
            .await
            .unwrap();
        assert_eq!(second, FinalizeOutcome::Skipped);

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Dead);
        assert_eq!(stored.output.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn terminal_snapshot_is_skipped_without_touching_the_store() {
        let store = InMemoryJobStore::new();
        let mut job = claimed(&store, r#"{"command":"true"}"#).await;
        job.state = JobState::Completed;

        let outcome = finalize_job(
            &store,
            &job,
            ExecutionResult::failure("late"),
            &BackoffPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Skipped);
        assert_eq!(
            store.get(&job.id).await.unwrap().unwrap().state,
            JobState::Processing
        );
    }
}
