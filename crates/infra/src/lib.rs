//! Infrastructure layer: SQLite store, command execution, worker runtime,
//! configuration file and signal handling.

pub mod config;
pub mod jobs;
pub mod shutdown;
pub mod worker;

pub use config::{AppPaths, ConfigError, ConfigStore};
pub use worker::{Worker, WorkerError, WorkerSettings, WorkerSummary};
