//! Retry delay and dead-letter threshold.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::config::QueueConfig;

/// Exponential backoff: `delay(attempts) = base ^ attempts` seconds.
///
/// No jitter and no cap, so identical inputs always yield identical delays.
/// Delays past the end of year 9999 saturate there, which keeps persisted
/// timestamps four-digit and therefore lexically ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: u32,
}

impl BackoffPolicy {
    pub fn new(base: u32) -> Self {
        Self { base }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.backoff_base)
    }

    /// Delay in whole seconds before the retry following `attempts` failures.
    pub fn delay_secs(&self, attempts: u32) -> u64 {
        u64::from(self.base).saturating_pow(attempts)
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        Duration::from_secs(self.delay_secs(attempts))
    }

    /// Instant at which a job that has failed `attempts` times becomes eligible again.
    pub fn retry_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.delay_secs(attempts)).unwrap_or(i64::MAX);
        let latest = latest_schedulable();
        TimeDelta::try_seconds(secs)
            .and_then(|delta| now.checked_add_signed(delta))
            .map_or(latest, |at| at.min(latest))
    }

    /// Whether `attempts` failures exhaust a budget of `max_retries`.
    pub fn is_exhausted(&self, attempts: u32, max_retries: u32) -> bool {
        attempts >= max_retries
    }
}

fn latest_schedulable() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
