//! Scheduler configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::recovery::RecoveryPolicy;

/// Latency floor slept before each task body.
pub const DEFAULT_DELAY_FLOOR_MS: u64 = 3000;

pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Size of the worker pool.
    pub workers: usize,

    pub delay_floor_ms: u64,

    /// What to do with tasks found `Running` at startup.
    pub recovery: RecoveryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            delay_floor_ms: DEFAULT_DELAY_FLOOR_MS,
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_delay_floor(mut self, delay: Duration) -> Self {
        self.delay_floor_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn delay_floor(&self) -> Duration {
        Duration::from_millis(self.delay_floor_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        self.recovery.validate()
    }
}

/// Read a JSON config file into `T`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
