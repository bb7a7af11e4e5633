//! Process-wide queue configuration.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Configuration shared by every producer and worker using the same store.
///
/// Missing fields fall back to their defaults, so a partial file is merged
/// over [`QueueConfig::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default per-job ceiling on failed executions.
    pub max_retries: u32,
    /// Base of the exponential retry delay, in seconds.
    pub backoff_base: u32,
    /// Idle wait between polls when no job is eligible.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            poll_interval_ms: 2000,
        }
    }
}

/// A settable configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
    PollIntervalMs,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBase,
        ConfigKey::PollIntervalMs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::PollIntervalMs => "poll_interval_ms",
        }
    }
}

impl core::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| DomainError::UnknownConfigKey(s.to_string()))
    }
}

impl QueueConfig {
    /// Read one value.
    pub fn get(&self, key: ConfigKey) -> u64 {
        match key {
            ConfigKey::MaxRetries => u64::from(self.max_retries),
            ConfigKey::BackoffBase => u64::from(self.backoff_base),
            ConfigKey::PollIntervalMs => self.poll_interval_ms,
        }
    }

    /// Parse and apply a `key = value` pair given as text.
    ///
    /// Nothing is modified when the key is unknown or the value is rejected.
    pub fn set(&mut self, key: &str, value: &str) -> DomainResult<ConfigKey> {
        let key: ConfigKey = key.parse()?;
        let invalid = |reason: &str| DomainError::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let parsed: u64 = value
            .trim()
            .parse()
            .map_err(|_| invalid("must be a non-negative integer"))?;

        match key {
            ConfigKey::MaxRetries | ConfigKey::BackoffBase => {
                let narrowed = u32::try_from(parsed).map_err(|_| invalid("value is too large"))?;
                if narrowed == 0 {
                    return Err(invalid("must be at least 1"));
                }
                if key == ConfigKey::MaxRetries {
                    self.max_retries = narrowed;
                } else {
                    self.backoff_base = narrowed;
                }
            }
            ConfigKey::PollIntervalMs => self.poll_interval_ms = parsed,
        }

        Ok(key)
    }

    /// All keys with their current values, in a stable order.
    pub fn entries(&self) -> Vec<(ConfigKey, u64)> {
        ConfigKey::ALL.into_iter().map(|k| (k, self.get(k))).collect()
    }
}
