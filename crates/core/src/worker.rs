//! Worker registration record.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::WorkerId;

/// Status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    /// Asked to exit at its next loop boundary.
    Stopping,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Stopping => "stopping",
        }
    }
}

impl core::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkerStatus::Running),
            "stopping" => Ok(WorkerStatus::Stopping),
            other => Err(DomainError::invalid_state(format!(
                "unknown worker status: {other}"
            ))),
        }
    }
}

/// Row describing one live worker process.
///
/// `last_heartbeat` is written at registration only; it is informational and
/// carries no liveness guarantee afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub pid: u32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(worker_id: WorkerId, pid: u32, now: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            pid,
            status: WorkerStatus::Running,
            last_heartbeat: now,
        }
    }
}
