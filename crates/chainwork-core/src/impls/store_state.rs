//! Shared record bookkeeping for the task store implementations.
//!
//! The in-memory and the JSON-file store both keep their records here; the
//! file store additionally writes a [`Snapshot`] after every mutation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChainId, ChainRecord, ChainStatus, DependencyGraph, NewTask, StoreError, TaskId, TaskRecord,
    TaskState, Transition,
};
use crate::ports::StoreCounts;

/// Current on-disk snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub tasks: Vec<TaskRecord>,
    pub chains: Vec<ChainRecord>,
}

/// Task and chain records plus the dependency index derived from them.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    /// All task records (single source of truth for tasks).
    records: HashMap<TaskId, TaskRecord>,

    /// All chain records.
    chains: HashMap<ChainId, ChainRecord>,

    /// Derived from `records[*].depends_on`; never persisted.
    graph: DependencyGraph,
}

impl StoreState {
    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported snapshot version {}", snapshot.version),
            )));
        }

        let mut state = Self::default();
        for record in snapshot.tasks {
            for dep in &record.depends_on {
                state.graph.link(record.id, *dep);
            }
            state.records.insert(record.id, record);
        }
        for chain in snapshot.chains {
            state.chains.insert(chain.id, chain);
        }
        Ok(state)
    }

    /// Snapshot sorted by id, so consecutive writes of the same state are
    /// byte-identical.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut tasks: Vec<TaskRecord> = self.records.values().cloned().collect();
        tasks.sort_by_key(|r| r.id);
        let mut chains: Vec<ChainRecord> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.id);
        Snapshot {
            version: SNAPSHOT_VERSION,
            tasks,
            chains,
        }
    }

    pub(crate) fn create(
        &mut self,
        id: TaskId,
        new: NewTask,
        now: DateTime<Utc>,
    ) -> Result<TaskId, StoreError> {
        if let Some(missing) = new
            .depends_on
            .iter()
            .find(|dep| !self.records.contains_key(*dep))
        {
            return Err(StoreError::UnknownDependency(*missing));
        }

        let record = TaskRecord::new(id, new, now);
        for dep in &record.depends_on {
            self.graph.link(id, *dep);
        }
        self.records.insert(id, record);
        Ok(id)
    }

    /// Group existing tasks into a chain.
    ///
    /// Every task after the first must depend on exactly its predecessor.
    pub(crate) fn create_chain(
        &mut self,
        id: ChainId,
        tasks: Vec<TaskId>,
        now: DateTime<Utc>,
    ) -> Result<ChainRecord, StoreError> {
        let Some(&terminal_task_id) = tasks.last() else {
            return Err(StoreError::EmptyChain);
        };

        for (i, task_id) in tasks.iter().enumerate() {
            let record = self.get(*task_id)?;
            if record.chain_id.is_some() {
                return Err(StoreError::AlreadyChained(*task_id));
            }
            let linked = match i {
                0 => record.depends_on.is_empty(),
                _ => record.depends_on == [tasks[i - 1]],
            };
            if !linked {
                return Err(StoreError::InvalidData {
                    id: *task_id,
                    reason: "chain tasks must each depend on the previous one".to_string(),
                });
            }
        }

        for task_id in &tasks {
            if let Some(record) = self.records.get_mut(task_id) {
                record.chain_id = Some(id);
            }
        }
        let chain = ChainRecord {
            id,
            tasks,
            terminal_task_id,
            created_at: now,
        };
        self.chains.insert(id, chain.clone());
        Ok(chain)
    }

    pub(crate) fn transition(
        &mut self,
        id: TaskId,
        t: Transition,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::TaskNotFound(id))?;
        record.apply(t, now)?;
        Ok(record.clone())
    }

    pub(crate) fn requeue_interrupted(
        &mut self,
        id: TaskId,
        not_before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, StoreError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::TaskNotFound(id))?;
        record.requeue_interrupted(not_before, now)?;
        Ok(record.clone())
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.records
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    pub(crate) fn chain(&self, id: ChainId) -> Result<ChainRecord, StoreError> {
        self.chains
            .get(&id)
            .cloned()
            .ok_or(StoreError::ChainNotFound(id))
    }

    pub(crate) fn dependents(&self, id: TaskId) -> Result<Vec<TaskId>, StoreError> {
        if !self.records.contains_key(&id) {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(self.graph.dependents(id))
    }

    /// Oldest first; ties broken by id (ULIDs sort by creation time).
    pub(crate) fn list_by_state(&self, state: TaskState) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .records
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    pub(crate) fn list_chains(&self) -> Vec<ChainRecord> {
        let mut chains: Vec<ChainRecord> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| (c.created_at, c.id));
        chains
    }

    pub(crate) fn counts_by_state(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for record in self.records.values() {
            counts.record(record.state);
        }
        counts
    }

    /// Remove finished chains (and finished standalone tasks) whose last
    /// update is older than `before`. Returns the number of task records
    /// removed.
    pub(crate) fn purge_finished(&mut self, before: DateTime<Utc>) -> usize {
        let mut doomed_tasks: Vec<TaskId> = Vec::new();
        let mut doomed_chains: Vec<ChainId> = Vec::new();

        for chain in self.chains.values() {
            let tasks: Vec<TaskRecord> = chain
                .tasks
                .iter()
                .filter_map(|id| self.records.get(id).cloned())
                .collect();
            let finished = ChainStatus::derive(chain, &tasks).state.is_terminal();
            let last_update = tasks.iter().map(|t| t.updated_at).max();
            // Blocked tasks behind a failure never run; they go with the chain.
            let settled = tasks
                .iter()
                .all(|t| t.state.is_terminal() || t.state == TaskState::Blocked);
            if finished && settled && last_update.is_some_and(|at| at < before) {
                doomed_chains.push(chain.id);
                doomed_tasks.extend(chain.tasks.iter().copied());
            }
        }

        doomed_tasks.extend(
            self.records
                .values()
                .filter(|r| r.chain_id.is_none() && r.state.is_terminal() && r.updated_at < before)
                .filter(|r| {
                    self.graph
                        .dependents(r.id)
                        .iter()
                        .all(|w| self.records.get(w).is_none_or(|w| w.state.is_terminal()))
                })
                .map(|r| r.id),
        );

        for chain_id in doomed_chains {
            self.chains.remove(&chain_id);
        }
        let mut removed = 0;
        for task_id in doomed_tasks {
            if self.records.remove(&task_id).is_some() {
                self.graph.forget(task_id);
                removed += 1;
            }
        }
        removed
    }
}
