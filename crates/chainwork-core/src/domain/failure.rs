//! The failure value a task returns instead of raising.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The body hit an error (bad input, I/O, decode, ...).
    Error,

    /// The body observed a cancellation request at a checkpoint.
    Cancelled,
}

/// Result value of a task body that did not produce output.
///
/// Task bodies catch their own errors and convert them into a `Failure`;
/// the scheduler only interprets values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            reason: reason.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            reason: "cancelled".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Error => write!(f, "failure: {}", self.reason),
            FailureKind::Cancelled => f.write_str("cancelled"),
        }
    }
}
