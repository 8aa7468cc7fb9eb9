use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize_folder;
use crate::source::SourceSystem;

pub const DEFAULT_PARTITION_SIZE: usize = 500;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total fetch attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between attempts. Zero defers to the source client's own backoff.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, delay_ms: 0 }
    }
}

/// Typed synchronization settings, populated once at startup and handed to
/// the orchestrator by value.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub partition_size: usize,
    pub workers: usize,
    pub retry: RetryConfig,
    /// Source project keys to walk.
    pub projects: Vec<String>,
    /// Folder prefixes to include per source; absent or empty means every folder.
    pub folder_scope: BTreeMap<SourceSystem, Vec<String>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            partition_size: DEFAULT_PARTITION_SIZE,
            workers: DEFAULT_WORKERS,
            retry: RetryConfig::default(),
            projects: Vec::new(),
            folder_scope: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a YAML document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed YAML and
    /// [`ConfigError::Invalid`] when a bound is violated.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] when a size or attempt bound is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_size == 0 {
            return Err(ConfigError::Invalid("partition_size MUST be >= 1".to_string()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers MUST be >= 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts MUST be >= 1".to_string()));
        }
        if self.projects.iter().any(|key| key.trim().is_empty()) {
            return Err(ConfigError::Invalid("project keys MUST be non-empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn includes_folder(&self, system: SourceSystem, folder: Option<&str>) -> bool {
        let Some(prefixes) = self.folder_scope.get(&system).filter(|prefixes| !prefixes.is_empty())
        else {
            return true;
        };

        // Compare whole path segments: `Regression` covers `Regression/Nightly`
        // but not `RegressionArchive`.
        let folder = normalize_folder(folder);
        prefixes.iter().any(|prefix| folder.starts_with(&normalize_folder(Some(prefix.as_str()))))
    }
}
