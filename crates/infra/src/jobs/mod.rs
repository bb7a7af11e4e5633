//! Durable job queue: persistence, execution and finalization.
//!
//! ## Components
//!
//! - `JobStore`: atomic claim/finalize plus listing, DLQ and worker registry
//!   (SQLite for real use, in-memory for tests)
//! - `CommandExecutor`: runs a job's shell command
//! - `finalize_job`: applies the retry/DLQ policy to an execution result

pub mod executor;
pub mod finalize;
pub mod sqlite;
pub mod store;

pub use executor::{CommandExecutor, ShellExecutor};
pub use finalize::{FinalizeOutcome, finalize_job};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobCounts, JobStore, StatusSummary, StoreError, WorkerCounts};
