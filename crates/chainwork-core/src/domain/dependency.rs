//! Dependency index for task records.
//!
//! - 順方向：task -> 待っている先行タスク
//! - 逆方向：task -> それを待っている後続タスク（release 時に引く）
//! - 両方向は常に同期している
//!
//! Chains are linear today, but the index does not assume it: a task may
//! depend on several predecessors.

use std::collections::{BTreeSet, HashMap};

use super::ids::TaskId;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    predecessors: HashMap<TaskId, BTreeSet<TaskId>>,
    dependents: HashMap<TaskId, BTreeSet<TaskId>>,
}

fn unlink(index: &mut HashMap<TaskId, BTreeSet<TaskId>>, key: TaskId, value: TaskId) {
    if let Some(set) = index.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            index.remove(&key);
        }
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` waits for `predecessor`.
    pub fn link(&mut self, task: TaskId, predecessor: TaskId) {
        self.predecessors.entry(task).or_default().insert(predecessor);
        self.dependents.entry(predecessor).or_default().insert(task);
    }

    /// Drop every edge touching `task` (used when records are purged).
    pub fn forget(&mut self, task: TaskId) {
        for predecessor in self.predecessors.remove(&task).unwrap_or_default() {
            unlink(&mut self.dependents, predecessor, task);
        }
        for dependent in self.dependents.remove(&task).unwrap_or_default() {
            unlink(&mut self.predecessors, dependent, task);
        }
    }

    /// Tasks waiting for `task`, in id order.
    ///
    /// The caller must still check that every other predecessor of a waiting
    /// task has succeeded.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.dependents
            .get(&task)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, task: TaskId) -> Vec<TaskId> {
        self.predecessors
            .get(&task)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
