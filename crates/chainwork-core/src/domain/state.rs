//! Task and chain state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Blocked -> Enqueued (every predecessor succeeded, input wired)
/// - Enqueued -> Running (claimed by a worker)
/// - Running -> Succeeded | Failed
/// - any non-terminal -> Cancelled
///
/// Crash recovery may move a task from Running back to Enqueued; that edge
/// is not part of the regular table and goes through
/// `TaskStore::requeue_interrupted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to run.
    Enqueued,

    /// Waiting for predecessors.
    Blocked,

    /// Currently being executed by a worker.
    Running,

    Succeeded,

    Failed,

    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Enqueued,
        TaskState::Blocked,
        TaskState::Running,
        TaskState::Succeeded,
        TaskState::Failed,
        TaskState::Cancelled,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Is this task eligible for a claim?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Enqueued)
    }

    /// The legal-transition table.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Blocked, Enqueued) => true,
            (Enqueued, Running) => true,
            (Running, Succeeded) | (Running, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Enqueued => "enqueued",
            TaskState::Blocked => "blocked",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain state, derived from the states of its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Nothing has started yet.
    Pending,

    /// At least one task has started and nothing has failed.
    Running,

    Succeeded,

    /// Some task on the path to the terminal task failed.
    Failed,

    Cancelled,
}

impl ChainState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChainState::Succeeded | ChainState::Failed | ChainState::Cancelled
        )
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainState::Pending => "pending",
            ChainState::Running => "running",
            ChainState::Succeeded => "succeeded",
            ChainState::Failed => "failed",
            ChainState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
