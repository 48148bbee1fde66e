//! Status records delivered to observers.

use serde::{Deserialize, Serialize};

use super::ids::{ChainId, TaskId};
use super::payload::Payload;
use super::record::{ChainRecord, TaskRecord};
use super::state::{ChainState, TaskState};

/// Implemented by records that can end an observation.
pub trait Terminal {
    fn is_terminal(&self) -> bool;
}

/// Snapshot of one task, emitted once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    pub output: Option<Payload>,
}

impl From<&TaskRecord> for StatusRecord {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id,
            state: record.state,
            output: record.output.clone(),
        }
    }
}

impl Terminal for StatusRecord {
    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Snapshot of a whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub chain_id: ChainId,
    pub state: ChainState,

    /// Output of the terminal task, only when the chain succeeded.
    pub output: Option<Payload>,
}

impl ChainStatus {
    /// Derive the chain status from its tasks.
    ///
    /// `Failed` if any task on the path failed, else `Cancelled` if any was
    /// cancelled, else the terminal task's own state.
    pub fn derive(chain: &ChainRecord, tasks: &[TaskRecord]) -> Self {
        let state_of = |id: TaskId| tasks.iter().find(|t| t.id == id).map(|t| t.state);

        let states: Vec<TaskState> = chain.tasks.iter().filter_map(|id| state_of(*id)).collect();
        let terminal = tasks.iter().find(|t| t.id == chain.terminal_task_id);

        let state = if states.contains(&TaskState::Failed) {
            ChainState::Failed
        } else if states.contains(&TaskState::Cancelled) {
            ChainState::Cancelled
        } else {
            match terminal.map(|t| t.state) {
                Some(TaskState::Succeeded) => ChainState::Succeeded,
                _ if states
                    .iter()
                    .any(|s| matches!(s, TaskState::Running | TaskState::Succeeded)) =>
                {
                    ChainState::Running
                }
                _ => ChainState::Pending,
            }
        };

        let output = match state {
            ChainState::Succeeded => terminal.and_then(|t| t.output.clone()),
            _ => None,
        };

        Self {
            chain_id: chain.id,
            state,
            output,
        }
    }
}

impl Terminal for ChainStatus {
    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
