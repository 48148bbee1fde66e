use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a task performs; selects the handler.
///
/// The three built-in kinds form the blur pipeline. `Custom` keeps the set
/// open for handlers registered by embedding applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Cleanup,
    Transform,
    Persist,
    Custom(String),
}

impl TaskKind {
    pub fn custom(name: impl Into<String>) -> Self {
        TaskKind::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::Cleanup => "cleanup",
            TaskKind::Transform => "transform",
            TaskKind::Persist => "persist",
            TaskKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
