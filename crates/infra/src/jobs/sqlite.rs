//! SQLite-backed job store.
//!
//! Every worker process opens its own pool against the same database file;
//! coordination between processes happens only through the statements below.
//!
//! ## Atomicity
//!
//! - Claim is a single `UPDATE ... WHERE id = (SELECT ... LIMIT 1) AND state =
//!   'pending' RETURNING ...`. A write statement takes SQLite's write lock
//!   before it reads, so concurrent claimants are serialized and each job is
//!   handed to at most one of them.
//! - Finalize is a single `UPDATE ... WHERE id = ? AND state = 'processing'
//!   AND worker_id = ?`; zero affected rows means the job was not ours to
//!   finalize.
//!
//! ## Timestamps
//!
//! Stored as fixed-width RFC 3339 UTC text with microsecond precision, so the
//! lexical order used by `run_at <= ?` and `ORDER BY created_at` is also the
//! chronological order. FIFO ties are broken by `rowid` (insertion order).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row, SqlitePool};
use tracing::instrument;

use queuectl_core::{
    DomainError, Job, JobId, JobState, NewJob, Transition, WorkerId, WorkerRecord, WorkerStatus,
};

use super::store::{JobStore, StatusSummary, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    command     TEXT NOT NULL,
    state       TEXT NOT NULL DEFAULT 'pending',
    attempts    INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    run_at      TEXT NOT NULL,
    worker_id   TEXT,
    output      TEXT
);

CREATE TABLE IF NOT EXISTS workers (
    worker_id      TEXT PRIMARY KEY,
    pid            INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'running',
    last_heartbeat TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_state_run_at ON jobs (state, run_at);
"#;

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, created_at, updated_at, run_at, worker_id, output";

/// SQLite job store.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) the database file at `path` and ensure the schema.
    ///
    /// Enables WAL so readers do not block the single writer, and waits up to
    /// five seconds for the write lock instead of failing immediately.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        // Taken as a file name, never as a URL: `?` and `%` stay literal.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// Pinned to one connection that never expires: each SQLite in-memory
    /// connection is its own database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("invalid db url: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open_in_memory", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| map_sqlx_error("create_schema", e))?;
        Ok(Self { pool })
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_transition(
        &self,
        job: &Job,
        transition: &Transition,
        now: &str,
    ) -> Result<u64, sqlx::Error> {
        let worker_id = job.worker_id.map(|w| w.to_string());
        let result = match transition {
            Transition::Complete { output } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'completed', output = ?1, worker_id = NULL, updated_at = ?2
                    WHERE id = ?3 AND state = 'processing' AND worker_id = ?4
                    "#,
                )
                .bind(output.as_deref())
                .bind(now)
                .bind(job.id.as_str())
                .bind(worker_id)
                .execute(&self.pool)
                .await?
            }
            Transition::Retry {
                attempts,
                run_at,
                output,
                ..
            } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'pending', attempts = ?1, run_at = ?2, output = ?3,
                        worker_id = NULL, updated_at = ?4
                    WHERE id = ?5 AND state = 'processing' AND worker_id = ?6
                    "#,
                )
                .bind(i64::from(*attempts))
                .bind(encode_ts(*run_at))
                .bind(output.as_deref())
                .bind(now)
                .bind(job.id.as_str())
                .bind(worker_id)
                .execute(&self.pool)
                .await?
            }
            Transition::DeadLetter { attempts, output } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'dead', attempts = ?1, output = ?2, worker_id = NULL,
                        updated_at = ?3
                    WHERE id = ?4 AND state = 'processing' AND worker_id = ?5
                    "#,
                )
                .bind(i64::from(*attempts))
                .bind(output.as_deref())
                .bind(now)
                .bind(job.id.as_str())
                .bind(worker_id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(job, Utc::now());
        let now = encode_ts(job.created_at);

        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, run_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?4)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.command)
        .bind(i64::from(job.max_retries))
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateId(job.id.clone())
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;

        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"
        ))
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(Job::try_from).transpose().map_err(StoreError::from)
    }

    async fn claim_next(&self, worker_id: WorkerId) -> Result<Option<Job>, StoreError> {
        let now = encode_ts(Utc::now());

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = 'processing', worker_id = ?1, updated_at = ?2
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND run_at <= ?2
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            AND state = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id.to_string())
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.map(Job::try_from).transpose().map_err(StoreError::from)
    }

    #[instrument(skip(self, job, transition), fields(job_id = %job.id), err)]
    async fn finalize(&self, job: &Job, transition: &Transition) -> Result<bool, StoreError> {
        let now = encode_ts(Utc::now());
        let affected = self
            .apply_transition(job, transition, &now)
            .await
            .map_err(|e| map_sqlx_error("finalize", e))?;
        Ok(affected == 1)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_state", e))?;

        rows.into_iter()
            .map(|row| Job::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn list_dead_letters(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dead_letters", e))?;

        rows.into_iter()
            .map(|row| Job::try_from(row).map_err(StoreError::from))
            .collect()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn retry_dead_letter(&self, job_id: &JobId) -> Result<Job, StoreError> {
        let now = encode_ts(Utc::now());

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, run_at = ?1, updated_at = ?1
            WHERE id = ?2 AND state = 'dead'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&now)
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("retry_dead_letter", e))?;

        match row {
            Some(row) => Ok(Job::try_from(row)?),
            None => Err(StoreError::NotFound(job_id.clone())),
        }
    }

    async fn status_summary(&self) -> Result<StatusSummary, StoreError> {
        let mut summary = StatusSummary::default();

        let job_counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(id) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("status_summary", e))?;
        for (state, count) in job_counts {
            summary.jobs.add(state.parse()?, count_to_u64(count));
        }

        let worker_counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(worker_id) FROM workers GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("status_summary", e))?;
        for (status, count) in worker_counts {
            summary.workers.add(status.parse()?, count_to_u64(count));
        }

        Ok(summary)
    }

    #[instrument(skip(self), fields(worker_id = %worker_id), err)]
    async fn register_worker(
        &self,
        worker_id: WorkerId,
        pid: u32,
    ) -> Result<WorkerRecord, StoreError> {
        let record = WorkerRecord::new(worker_id, pid, Utc::now());

        sqlx::query(
            "INSERT INTO workers (worker_id, pid, status, last_heartbeat) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(worker_id.to_string())
        .bind(i64::from(pid))
        .bind(record.status.as_str())
        .bind(encode_ts(record.last_heartbeat))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_worker", e))?;

        Ok(record)
    }

    async fn remove_worker(&self, worker_id: WorkerId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM workers WHERE worker_id = ?1")
            .bind(worker_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_worker", e))?;
        Ok(())
    }

    async fn worker_status(
        &self,
        worker_id: WorkerId,
    ) -> Result<Option<WorkerStatus>, StoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM workers WHERE worker_id = ?1")
                .bind(worker_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("worker_status", e))?;

        status
            .map(|(s,)| s.parse::<WorkerStatus>())
            .transpose()
            .map_err(StoreError::from)
    }

    async fn stop_all_workers(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE workers SET status = 'stopping' WHERE status = 'running'")
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("stop_all_workers", e))?;
        Ok(result.rows_affected())
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::invalid_state(format!("{column}: {e}")))
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Storage(format!("database error in {operation}: {db_err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a primary-key / unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    created_at: String,
    updated_at: String,
    run_at: String,
    worker_id: Option<String>,
    output: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for JobRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            command: row.try_get("command")?,
            state: row.try_get("state")?,
            attempts: row.try_get("attempts")?,
            max_retries: row.try_get("max_retries")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            run_at: row.try_get("run_at")?,
            worker_id: row.try_get("worker_id")?,
            output: row.try_get("output")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let counter = |column: &str, value: i64| {
            u32::try_from(value)
                .map_err(|_| DomainError::invalid_state(format!("{column} out of range: {value}")))
        };

        Ok(Job {
            id: JobId::parse(&row.id)?,
            command: row.command,
            state: row.state.parse()?,
            attempts: counter("attempts", row.attempts)?,
            max_retries: counter("max_retries", row.max_retries)?,
            created_at: decode_ts("created_at", &row.created_at)?,
            updated_at: decode_ts("updated_at", &row.updated_at)?,
            run_at: decode_ts("run_at", &row.run_at)?,
            worker_id: row.worker_id.as_deref().map(str::parse).transpose()?,
            output: row.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use queuectl_core::{BackoffPolicy, EnqueueRequest, ExecutionResult, QueueConfig};
    use queuectl_core::state_machine::finalize;

    fn new_job(json: &str) -> NewJob {
        EnqueueRequest::from_json(json)
            .unwrap()
            .into_new_job(&QueueConfig::default())
            .unwrap()
    }

    async fn store() -> SqliteJobStore {
        SqliteJobStore::open_in_memory().await.unwrap()
    }

    async fn fail_claimed(store: &SqliteJobStore, job: &Job, policy: &BackoffPolicy) -> Transition {
        let t = finalize(job, ExecutionResult::failure("boom"), policy, Utc::now()).unwrap();
        assert!(store.finalize(job, &t).await.unwrap());
        t
    }

    /// Make a retried job eligible again without waiting out its backoff.
    async fn make_eligible(store: &SqliteJobStore, id: &JobId) {
        sqlx::query("UPDATE jobs SET run_at = ?1 WHERE id = ?2")
            .bind(encode_ts(Utc::now() - TimeDelta::seconds(1)))
            .bind(id.as_str())
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = encode_ts(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().into());
        let b = encode_ts(
            DateTime::parse_from_rfc3339("2026-01-02T03:04:05.5Z")
                .unwrap()
                .into(),
        );
        assert_eq!(a, "2026-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(decode_ts("t", &b).unwrap().timestamp_subsec_micros(), 500_000);
    }

    #[tokio::test]
    async fn enqueue_then_get() {
        let store = store().await;
        let job = store
            .enqueue(new_job(r#"{"id":"job-1","command":"echo hi","max_retries":5}"#))
            .await
            .unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.command, "echo hi");
        assert_eq!(loaded.state, JobState::Pending);
        assert_eq!(loaded.attempts, 0);
        assert_eq!(loaded.max_retries, 5);
        assert!(loaded.worker_id.is_none());
        assert_eq!(loaded.run_at, loaded.created_at);
    }

    #[tokio::test]
    async fn duplicate_id_is_distinguished() {
        let store = store().await;
        store.enqueue(new_job(r#"{"id":"x","command":"echo 1"}"#)).await.unwrap();
        let err = store
            .enqueue(new_job(r#"{"id":"x","command":"echo 1"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateId(ref id) if id.as_str() == "x"));
        assert_eq!(store.list_by_state(JobState::Pending).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let store = store().await;
        store.enqueue(new_job(r#"{"id":"a","command":"true"}"#)).await.unwrap();
        store.enqueue(new_job(r#"{"id":"b","command":"true"}"#)).await.unwrap();

        let worker = WorkerId::new();
        let first = store.claim_next(worker).await.unwrap().unwrap();
        let second = store.claim_next(worker).await.unwrap().unwrap();

        assert_eq!(first.id.as_str(), "a");
        assert_eq!(second.id.as_str(), "b");
        assert_eq!(first.state, JobState::Processing);
        assert_eq!(first.worker_id, Some(worker));
        assert!(store.claim_next(worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_skips_jobs_not_yet_due() {
        let store = store().await;
        let job = store.enqueue(new_job(r#"{"command":"true"}"#)).await.unwrap();
        sqlx::query("UPDATE jobs SET run_at = ?1 WHERE id = ?2")
            .bind(encode_ts(Utc::now() + TimeDelta::hours(1)))
            .bind(job.id.as_str())
            .execute(&store.pool)
            .await
            .unwrap();

        assert!(store.claim_next(WorkerId::new()).await.unwrap().is_none());
        assert_eq!(
            store.get(&job.id).await.unwrap().unwrap().state,
            JobState::Pending
        );
    }

    #[tokio::test]
    async fn failures_follow_backoff_then_dead_letter() {
        let store = store().await;
        let policy = BackoffPolicy::new(2);
        store
            .enqueue(new_job(r#"{"id":"f","command":"exit 1","max_retries":3}"#))
            .await
            .unwrap();
        let worker = WorkerId::new();

        let before = Utc::now();
        let job = store.claim_next(worker).await.unwrap().unwrap();
        fail_claimed(&store, &job, &policy).await;
        let after_first = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(after_first.state, JobState::Pending);
        assert_eq!(after_first.attempts, 1);
        assert!(after_first.run_at >= before + TimeDelta::seconds(2));
        assert!(after_first.run_at <= Utc::now() + TimeDelta::seconds(2));
        assert!(after_first.worker_id.is_none());
        assert_eq!(after_first.output.as_deref(), Some("boom"));

        // Not eligible until the backoff elapses.
        assert!(store.claim_next(worker).await.unwrap().is_none());

        make_eligible(&store, &job.id).await;
        let job = store.claim_next(worker).await.unwrap().unwrap();
        let before = Utc::now();
        fail_claimed(&store, &job, &policy).await;
        let after_second = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(after_second.attempts, 2);
        assert!(after_second.run_at >= before + TimeDelta::seconds(4));

        make_eligible(&store, &job.id).await;
        let job = store.claim_next(worker).await.unwrap().unwrap();
        fail_claimed(&store, &job, &policy).await;
        let dead = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(dead.state, JobState::Dead);
        assert_eq!(dead.attempts, 3);
    }

    #[tokio::test]
    async fn finalize_after_terminal_is_a_no_op() {
        let store = store().await;
        store.enqueue(new_job(r#"{"command":"echo hi"}"#)).await.unwrap();
        let job = store.claim_next(WorkerId::new()).await.unwrap().unwrap();

        let done = finalize(&job, ExecutionResult::success("hi"), &BackoffPolicy::default(), Utc::now())
            .unwrap();
        assert!(store.finalize(&job, &done).await.unwrap());

        let failed = Transition::DeadLetter {
            attempts: 9,
            output: Some("late".into()),
        };
        assert!(!store.finalize(&job, &failed).await.unwrap());

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.output.as_deref(), Some("hi"));
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn finalize_by_another_worker_is_rejected() {
        let store = store().await;
        store.enqueue(new_job(r#"{"command":"true"}"#)).await.unwrap();
        let mut job = store.claim_next(WorkerId::new()).await.unwrap().unwrap();
        job.worker_id = Some(WorkerId::new());

        let t = Transition::Complete { output: None };
        assert!(!store.finalize(&job, &t).await.unwrap());
        assert_eq!(
            store.get(&job.id).await.unwrap().unwrap().state,
            JobState::Processing
        );
    }

    #[tokio::test]
    async fn dead_letters_are_listed_newest_first_and_requeued() {
        let store = store().await;
        let policy = BackoffPolicy::default();
        store
            .enqueue(new_job(r#"{"id":"d1","command":"exit 1","max_retries":1}"#))
            .await
            .unwrap();
        store
            .enqueue(new_job(r#"{"id":"d2","command":"exit 1","max_retries":1}"#))
            .await
            .unwrap();

        let worker = WorkerId::new();
        let d1 = store.claim_next(worker).await.unwrap().unwrap();
        fail_claimed(&store, &d1, &policy).await;
        let d2 = store.claim_next(worker).await.unwrap().unwrap();
        fail_claimed(&store, &d2, &policy).await;

        let dlq: Vec<_> = store
            .list_dead_letters()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(dlq, ["d2", "d1"]);

        let before = Utc::now();
        let requeued = store.retry_dead_letter(&d1.id).await.unwrap();
        assert_eq!(requeued.state, JobState::Pending);
        assert_eq!(requeued.attempts, 0);
        assert!(requeued.run_at >= before - TimeDelta::milliseconds(1));
        assert!(requeued.run_at <= Utc::now());

        // Eligible immediately.
        let again = store.claim_next(worker).await.unwrap().unwrap();
        assert_eq!(again.id.as_str(), "d1");
    }

    #[tokio::test]
    async fn retry_of_non_dead_job_reports_not_found() {
        let store = store().await;
        let job = store.enqueue(new_job(r#"{"command":"true"}"#)).await.unwrap();

        assert!(matches!(
            store.retry_dead_letter(&job.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.retry_dead_letter(&JobId::parse("missing").unwrap()).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(
            store.get(&job.id).await.unwrap().unwrap().state,
            JobState::Pending
        );
    }

    #[tokio::test]
    async fn status_summary_groups_jobs_and_workers() {
        let store = store().await;
        for i in 0..3 {
            store
                .enqueue(new_job(&format!(r#"{{"command":"echo {i}"}}"#)))
                .await
                .unwrap();
        }
        let worker = WorkerId::new();
        store.register_worker(worker, 7).await.unwrap();
        store.register_worker(WorkerId::new(), 8).await.unwrap();
        store.claim_next(worker).await.unwrap();

        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.jobs.pending, 2);
        assert_eq!(summary.jobs.processing, 1);
        assert_eq!(summary.jobs.completed, 0);
        assert_eq!(summary.workers.running, 2);

        assert_eq!(store.stop_all_workers().await.unwrap(), 2);
        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.workers.running, 0);
        assert_eq!(summary.workers.stopping, 2);
    }

    #[tokio::test]
    async fn worker_registration_lifecycle() {
        let store = store().await;
        let worker = WorkerId::new();

        assert_eq!(store.worker_status(worker).await.unwrap(), None);
        let record = store.register_worker(worker, 1234).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Running);
        assert_eq!(
            store.worker_status(worker).await.unwrap(),
            Some(WorkerStatus::Running)
        );

        store.stop_all_workers().await.unwrap();
        assert_eq!(
            store.worker_status(worker).await.unwrap(),
            Some(WorkerStatus::Stopping)
        );
        // Idempotent.
        assert_eq!(store.stop_all_workers().await.unwrap(), 0);

        store.remove_worker(worker).await.unwrap();
        assert_eq!(store.worker_status(worker).await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_paths_with_url_characters_open_literally() {
        let dir = tempfile::tempdir().unwrap();

        for name in ["q?mode=ro", "100%25done"] {
            let home = dir.path().join(name);
            std::fs::create_dir_all(&home).unwrap();
            let path = home.join("queue.db");

            let store = SqliteJobStore::open(&path).await.unwrap();
            let job = store.enqueue(new_job(r#"{"command":"true"}"#)).await.unwrap();
            store.close().await;

            assert!(path.exists(), "database not created at {}", path.display());
            let reopened = SqliteJobStore::open(&path).await.unwrap();
            assert_eq!(reopened.get(&job.id).await.unwrap().unwrap().id, job.id);
            reopened.close().await;
        }
    }
}
