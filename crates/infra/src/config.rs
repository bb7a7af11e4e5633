//! Application directory and configuration file persistence.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use queuectl_core::{ConfigKey, DomainError, QueueConfig};

/// Environment variable overriding the application directory.
pub const HOME_ENV: &str = "QUEUECTL_HOME";

const APP_DIR: &str = ".queuectl";
const DB_FILE: &str = "queue.db";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory; set {HOME_ENV}")]
    NoHomeDir,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Locations of the queue database and configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Explicit override, then `$QUEUECTL_HOME`, then `~/.queuectl`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(root) = explicit {
            return Ok(Self::new(root));
        }
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(root));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(APP_DIR)))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Create the directory if it does not exist yet.
    pub fn ensure_exists(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.root).map_err(|source| ConfigError::Io {
            path: self.root.clone(),
            source,
        })
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

/// JSON-file-backed [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration.
    ///
    /// A missing file is created with defaults; an unreadable or corrupt file
    /// yields defaults with a warning.
    pub fn load(&self) -> QueueConfig {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = QueueConfig::default();
                if let Err(err) = self.save(&defaults) {
                    warn!(error = %err, "failed to write default configuration");
                }
                return defaults;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read configuration; using defaults");
                return QueueConfig::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "invalid configuration file; using defaults");
            QueueConfig::default()
        })
    }

    pub fn save(&self, config: &QueueConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, json).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Validate and persist one `key = value` pair; returns the updated config.
    pub fn set(&self, key: &str, value: &str) -> Result<(ConfigKey, QueueConfig), ConfigError> {
        let mut config = self.load();
        let key = config.set(key, value)?;
        self.save(&config)?;
        Ok((key, config))
    }

    pub fn get(&self, key: &str) -> Result<u64, ConfigError> {
        let key: ConfigKey = key.parse()?;
        Ok(self.load().get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(AppPaths::new(dir.path()).config_file())
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.load(), QueueConfig::default());
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        assert_eq!(store.load(), QueueConfig::default());
    }

    #[test]
    fn set_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        store_in(&dir).set("backoff_base", "3").unwrap();

        let reloaded = store_in(&dir).load();
        assert_eq!(reloaded.backoff_base, 3);
        assert_eq!(reloaded.max_retries, 3);
        assert_eq!(store_in(&dir).get("backoff_base").unwrap(), 3);
    }

    #[test]
    fn rejected_values_leave_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.set("max_retries", "5").unwrap();

        assert!(matches!(
            store.set("max_retries", "five"),
            Err(ConfigError::Domain(DomainError::InvalidConfigValue { .. }))
        ));
        assert!(matches!(
            store.set("colour", "1"),
            Err(ConfigError::Domain(DomainError::UnknownConfigKey(_)))
        ));
        assert_eq!(store.load().max_retries, 5);
    }

    #[test]
    fn explicit_root_wins() {
        let paths = AppPaths::resolve(Some(PathBuf::from("/tmp/q"))).unwrap();
        assert_eq!(paths.database(), PathBuf::from("/tmp/q/queue.db"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/q/config.json"));
    }
}
