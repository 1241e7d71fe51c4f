//! Queue and persistence configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Snapshot file; `None` keeps records in memory only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Retry ceiling for requests that do not set one.
    #[serde(default)]
    pub default_max_retries: u32,
    /// Timeout for requests that do not set one.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    /// Age after which terminal records are removed by periodic cleanup.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

const fn default_retention_secs() -> u64 {
    7 * 24 * 3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            default_max_retries: 0,
            default_timeout_secs: None,
            retention_secs: default_retention_secs(),
        }
    }
}

impl QueueConfig {
    /// Persist to `path`.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Set the default retry ceiling.
    #[must_use]
    pub const fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Set the default timeout.
    #[must_use]
    pub const fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = Some(secs);
        self
    }

    /// Validate queue configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_secs == Some(0) {
            return Err("default_timeout_secs must be greater than 0".into());
        }
        if self
            .store_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err("store_path must not be empty".into());
        }
        Ok(())
    }
}
