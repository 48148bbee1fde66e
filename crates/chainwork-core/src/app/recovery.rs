//! Crash recovery policy: what happens to tasks found `Running` at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::ConfigError;

/// Recovery policy for interrupted tasks.
///
/// Task bodies are idempotent on retry, so the default simply re-enqueues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Run the task again immediately.
    #[default]
    Requeue,

    /// Mark the task `Failed` and leave it for manual intervention.
    Fail,

    /// Run again after an exponential backoff, up to `max_attempts` runs.
    RetryWithBackoff {
        max_attempts: u32,
        base_delay_ms: u64,
        multiplier: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    Requeue { delay: Duration },
    Fail { reason: String },
}

impl RecoveryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RecoveryPolicy::RetryWithBackoff {
            max_attempts,
            multiplier,
            ..
        } = self
        {
            if *max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: "recovery.max_attempts",
                    reason: "must be at least 1".to_string(),
                });
            }
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(ConfigError::Invalid {
                    key: "recovery.multiplier",
                    reason: format!("{multiplier} is not a finite number >= 1"),
                });
            }
        }
        Ok(())
    }

    /// Decide for a task that already started `attempts` times.
    pub fn decide(&self, attempts: u32) -> RecoveryAction {
        match self {
            RecoveryPolicy::Requeue => RecoveryAction::Requeue {
                delay: Duration::ZERO,
            },
            RecoveryPolicy::Fail => RecoveryAction::Fail {
                reason: "interrupted by a restart".to_string(),
            },
            RecoveryPolicy::RetryWithBackoff {
                max_attempts,
                base_delay_ms,
                multiplier,
            } => {
                if attempts >= *max_attempts {
                    return RecoveryAction::Fail {
                        reason: format!("interrupted {attempts} times, giving up"),
                    };
                }
                RecoveryAction::Requeue {
                    delay: backoff(Duration::from_millis(*base_delay_ms), *multiplier, attempts),
                }
            }
        }
    }
}

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// `base * multiplier^(attempts - 1)`, capped at [`MAX_BACKOFF`].
///
/// Example with base=2s, multiplier=2.0:
/// - attempt 1: 2s
/// - attempt 2: 4s
/// - attempt 3: 8s
fn backoff(base: Duration, multiplier: f64, attempts: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = base.as_secs_f64() * multiplier.powi(exponent);
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}
