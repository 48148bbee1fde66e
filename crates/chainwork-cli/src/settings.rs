//! Settings - CLI の設定
//!
//! 優先順位：CLI フラグ > 環境変数 (`CHAINWORK_*`) > JSON 設定ファイル > 既定値

use std::path::{Path, PathBuf};

use chainwork_core::app::{ConfigError, SchedulerConfig, load_json};
use serde::{Deserialize, Serialize};

pub const ENV_WORKERS: &str = "CHAINWORK_WORKERS";
pub const ENV_DELAY_FLOOR_MS: &str = "CHAINWORK_DELAY_FLOOR_MS";
pub const ENV_STATE_PATH: &str = "CHAINWORK_STATE_PATH";
pub const ENV_OUTPUT_DIR: &str = "CHAINWORK_OUTPUT_DIR";
pub const ENV_MEDIA_DIR: &str = "CHAINWORK_MEDIA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,

    /// JSON snapshot of the task store.
    pub state_path: PathBuf,

    /// Intermediate blur outputs; emptied by the cleanup task.
    pub output_dir: PathBuf,

    /// Where persisted images land.
    pub media_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            state_path: PathBuf::from("chainwork-state.json"),
            output_dir: PathBuf::from("blur_filter_outputs"),
            media_dir: PathBuf::from("gallery"),
        }
    }
}

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub delay_floor_ms: Option<u64>,
    pub state_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
}

fn parse_var<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{raw}': {e}"),
    })
}

impl Settings {
    /// File (if any), then the process environment, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => load_json(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.apply_overrides(overrides);
        settings.scheduler.validate()?;
        Ok(settings)
    }

    pub fn apply_env(
        &mut self,
        var: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = var(ENV_WORKERS) {
            self.scheduler.workers = parse_var(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = var(ENV_DELAY_FLOOR_MS) {
            self.scheduler.delay_floor_ms = parse_var(ENV_DELAY_FLOOR_MS, &raw)?;
        }
        if let Some(raw) = var(ENV_STATE_PATH) {
            self.state_path = PathBuf::from(raw);
        }
        if let Some(raw) = var(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(raw);
        }
        if let Some(raw) = var(ENV_MEDIA_DIR) {
            self.media_dir = PathBuf::from(raw);
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(workers) = o.workers {
            self.scheduler.workers = workers;
        }
        if let Some(ms) = o.delay_floor_ms {
            self.scheduler.delay_floor_ms = ms;
        }
        if let Some(path) = &o.state_path {
            self.state_path = path.clone();
        }
        if let Some(dir) = &o.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(dir) = &o.media_dir {
            self.media_dir = dir.clone();
        }
    }
}
