//! `queuectl-core` — domain model of the durable job queue.
//!
//! This crate contains **pure logic** (no I/O): identifiers, the job and
//! worker records, configuration validation, the backoff policy and the
//! finalize state machine.

pub mod backoff;
pub mod config;
pub mod error;
pub mod id;
pub mod job;
pub mod state_machine;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::{ConfigKey, QueueConfig};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, WorkerId};
pub use job::{EnqueueRequest, Job, JobState, NewJob};
pub use state_machine::{ExecutionResult, Transition};
pub use worker::{WorkerRecord, WorkerStatus};
