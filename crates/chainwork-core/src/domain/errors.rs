//! Errors raised by the task store.

use thiserror::Error;

use super::ids::{ChainId, TaskId};
use super::state::TaskState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("new task depends on unknown task {0}")]
    UnknownDependency(TaskId),

    #[error("task {0} already belongs to a chain")]
    AlreadyChained(TaskId),

    #[error("cannot create an empty chain")]
    EmptyChain,

    /// Compare-and-set lost: the stored state is not the expected one.
    /// Callers treat this as "someone else got there first".
    #[error("state conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: TaskId,
        expected: TaskState,
        actual: TaskState,
    },

    /// The requested edge is not in the transition table. This is a
    /// scheduler bug, never a task failure.
    #[error("illegal transition on {id}: {from} -> {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("invalid transition data on {id}: {reason}")]
    InvalidData { id: TaskId, reason: String },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Invariant violations that indicate a bug in the caller.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            StoreError::IllegalTransition { .. } | StoreError::InvalidData { .. }
        )
    }
}
