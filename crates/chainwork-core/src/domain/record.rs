//! Task and chain records: the store's single source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use super::ids::{ChainId, TaskId};
use super::kind::TaskKind;
use super::payload::Payload;
use super::state::TaskState;
use super::wiring::Wiring;

/// Everything the store needs to create a task; the store assigns the id
/// and the initial state.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: TaskKind,
    pub input: Payload,
    pub wiring: Wiring,
    pub depends_on: Vec<TaskId>,
}

impl NewTask {
    pub fn new(kind: TaskKind, input: Payload) -> Self {
        Self {
            kind,
            input,
            wiring: Wiring::default(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.wiring = wiring;
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.depends_on.push(id);
        self
    }
}

/// Persisted state of one task.
///
/// Design:
/// - Only the store mutates a record, and only through [`TaskRecord::apply`].
/// - `input` starts as the seed and is replaced by the wired input when the
///   task is released from `Blocked`.
/// - `output` is written exactly once, on `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,

    pub kind: TaskKind,
    pub state: TaskState,
    pub input: Payload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,

    #[serde(default)]
    pub depends_on: Vec<TaskId>,

    #[serde(default)]
    pub wiring: Wiring,

    /// Diagnostic recorded when the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Number of times this task entered `Running`.
    #[serde(default)]
    pub attempts: u32,

    /// Earliest time a re-enqueued task may be claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        let state = if new.depends_on.is_empty() {
            TaskState::Enqueued
        } else {
            TaskState::Blocked
        };
        Self {
            id,
            chain_id: None,
            kind: new.kind,
            state,
            input: new.input,
            output: None,
            depends_on: new.depends_on,
            wiring: new.wiring,
            failure: None,
            attempts: 0,
            not_before: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Compare-and-set a transition onto this record.
    ///
    /// Checks, in order: the edge is in the table, the stored state matches
    /// `expected`, the attached data fits the target state.
    pub fn apply(&mut self, t: Transition, now: DateTime<Utc>) -> Result<(), StoreError> {
        if !t.expected.can_transition_to(t.next) {
            return Err(StoreError::IllegalTransition {
                id: self.id,
                from: t.expected,
                to: t.next,
            });
        }
        if self.state != t.expected {
            return Err(StoreError::Conflict {
                id: self.id,
                expected: t.expected,
                actual: self.state,
            });
        }
        match (t.next, &t.output) {
            (TaskState::Succeeded, None) => {
                return Err(self.invalid("succeeded without output"));
            }
            (next, Some(_)) if next != TaskState::Succeeded => {
                return Err(self.invalid("output attached to a non-success transition"));
            }
            _ => {}
        }
        if t.input.is_some() && t.next != TaskState::Enqueued {
            return Err(self.invalid("input can only change on release"));
        }

        self.state = t.next;
        self.updated_at = now;
        match t.next {
            TaskState::Enqueued => {
                if let Some(input) = t.input {
                    self.input = input;
                }
            }
            TaskState::Running => {
                self.attempts += 1;
                self.started_at = Some(now);
                self.not_before = None;
            }
            TaskState::Succeeded => {
                self.output = t.output;
                self.finished_at = Some(now);
            }
            TaskState::Failed => {
                self.failure = t.failure;
                self.finished_at = Some(now);
            }
            TaskState::Cancelled => {
                self.finished_at = Some(now);
            }
            TaskState::Blocked => {}
        }
        Ok(())
    }

    /// Crash-recovery edge `Running -> Enqueued`.
    pub fn requeue_interrupted(
        &mut self,
        not_before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.state != TaskState::Running {
            return Err(StoreError::Conflict {
                id: self.id,
                expected: TaskState::Running,
                actual: self.state,
            });
        }
        self.state = TaskState::Enqueued;
        self.not_before = not_before;
        self.started_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn invalid(&self, reason: &str) -> StoreError {
        StoreError::InvalidData {
            id: self.id,
            reason: reason.to_string(),
        }
    }
}

/// A requested state change, applied with compare-and-set semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub expected: TaskState,
    pub next: TaskState,
    pub input: Option<Payload>,
    pub output: Option<Payload>,
    pub failure: Option<String>,
}

impl Transition {
    fn edge(expected: TaskState, next: TaskState) -> Self {
        Self {
            expected,
            next,
            input: None,
            output: None,
            failure: None,
        }
    }

    /// `Blocked -> Enqueued` with the wired input.
    pub fn release(input: Payload) -> Self {
        Self {
            input: Some(input),
            ..Self::edge(TaskState::Blocked, TaskState::Enqueued)
        }
    }

    /// `Enqueued -> Running`.
    pub fn start() -> Self {
        Self::edge(TaskState::Enqueued, TaskState::Running)
    }

    /// `Running -> Succeeded`.
    pub fn succeed(output: Payload) -> Self {
        Self {
            output: Some(output),
            ..Self::edge(TaskState::Running, TaskState::Succeeded)
        }
    }

    /// `Running -> Failed`.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::edge(TaskState::Running, TaskState::Failed)
        }
    }

    /// `from -> Cancelled`.
    pub fn cancel(from: TaskState) -> Self {
        Self::edge(from, TaskState::Cancelled)
    }

    /// Build an arbitrary edge; the store rejects it if it is not legal.
    pub fn raw(expected: TaskState, next: TaskState) -> Self {
        Self::edge(expected, next)
    }
}

/// A linear chain of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub id: ChainId,

    /// Tasks in execution order; each depends on the previous one.
    pub tasks: Vec<TaskId>,

    pub terminal_task_id: TaskId,
    pub created_at: DateTime<Utc>,
}
