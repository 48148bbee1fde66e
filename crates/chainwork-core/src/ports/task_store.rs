//! TaskStore port - タスク状態の正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスクレコード（状態・入力・出力・依存）
//! - チェーンレコード（順序・終端タスク）
//!
//! # 設計原則
//! - 状態遷移はすべて `transition` の compare-and-set を通す
//! - Scheduler はレコードを直接書き換えない
//! - プロセス再起動後もすべての状態を復元できる（永続実装の場合）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChainId, ChainRecord, NewTask, StoreError, TaskId, TaskRecord, TaskState, Transition,
};

/// Task counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub enqueued: usize,
    pub blocked: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StoreCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Enqueued => self.enqueued += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Running => self.running += 1,
            TaskState::Succeeded => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.enqueued + self.blocked + self.running + self.succeeded + self.failed + self.cancelled
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task. `Enqueued` when it has no dependency, `Blocked` otherwise.
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError>;

    /// Group already-created tasks into a chain, in execution order.
    async fn create_chain(&self, tasks: Vec<TaskId>) -> Result<ChainRecord, StoreError>;

    /// Atomic compare-and-set state change.
    ///
    /// - `StoreError::Conflict`: the stored state is not `t.expected`.
    /// - `StoreError::IllegalTransition`: the edge is not in the table.
    async fn transition(&self, id: TaskId, t: Transition) -> Result<TaskRecord, StoreError>;

    /// Crash recovery: `Running -> Enqueued`, optionally delayed.
    async fn requeue_interrupted(
        &self,
        id: TaskId,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<TaskRecord, StoreError>;

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    async fn chain(&self, id: ChainId) -> Result<ChainRecord, StoreError>;

    /// Tasks that list `id` in their `depends_on`.
    async fn dependents(&self, id: TaskId) -> Result<Vec<TaskId>, StoreError>;

    /// Records in `state`, oldest first.
    async fn list_by_state(&self, state: TaskState) -> Result<Vec<TaskRecord>, StoreError>;

    async fn list_chains(&self) -> Result<Vec<ChainRecord>, StoreError>;

    async fn counts_by_state(&self) -> Result<StoreCounts, StoreError>;

    /// Garbage-collect finished chains last updated before `before`.
    /// Returns the number of task records removed.
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}
