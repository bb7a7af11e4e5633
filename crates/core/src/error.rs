//! Domain error model.

use thiserror::Error;

use crate::job::JobState;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only; storage and I/O failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed enqueue payload).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A configuration key outside the supported set.
    #[error("unknown config key \"{0}\" (valid keys: max_retries, backoff_base, poll_interval_ms)")]
    UnknownConfigKey(String),

    /// A configuration value that is not a usable integer.
    #[error("invalid value \"{value}\" for {key}: {reason}")]
    InvalidConfigValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A persisted enum column holds an unrecognised value.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A state transition that the job lifecycle does not allow.
    #[error("cannot {action} a job in state {from}")]
    InvalidTransition { action: &'static str, from: JobState },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
