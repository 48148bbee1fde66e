//! TaskStore implementation over [`StoreState`], generic over how the state
//! is persisted.
//!
//! - [`MemoryTaskStore`]: nothing survives the process (tests, one-shot runs)
//! - [`JsonFileTaskStore`](super::JsonFileTaskStore): snapshot file after
//!   every mutation
//!
//! All mutations take one lock, so each CAS is atomic with respect to every
//! other store call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::store_state::{Snapshot, StoreState};
use crate::domain::{
    ChainId, ChainRecord, NewTask, StoreError, TaskId, TaskRecord, TaskState, Transition,
};
use crate::ports::{Clock, IdGenerator, StoreCounts, SystemClock, TaskStore, UlidGenerator};

/// Where a store writes its snapshot after a mutation.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// `false` skips snapshot construction entirely.
    fn is_durable(&self) -> bool;

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// No persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Volatile;

#[async_trait]
impl Persistence for Volatile {
    fn is_durable(&self) -> bool {
        false
    }

    async fn save(&self, _snapshot: &Snapshot) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct RecordStore<P> {
    state: Mutex<StoreState>,
    persistence: P,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

pub type MemoryTaskStore = RecordStore<Volatile>;

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::from_parts(StoreState::default(), Volatile, clock, ids)
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Persistence> RecordStore<P> {
    pub(crate) fn from_parts(
        state: StoreState,
        persistence: P,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            persistence,
            clock,
            ids,
        }
    }

    /// Apply `f` under the lock and persist the result.
    ///
    /// If persisting fails the in-memory state is rolled back, so memory
    /// never runs ahead of the snapshot.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState, DateTime<Utc>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        if !self.persistence.is_durable() {
            return f(&mut state, self.clock.now());
        }

        let before = state.clone();
        let out = f(&mut state, self.clock.now())?;
        if let Err(e) = self.persistence.save(&state.snapshot()).await {
            *state = before;
            return Err(e);
        }
        Ok(out)
    }
}

#[async_trait]
impl<P: Persistence> TaskStore for RecordStore<P> {
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let id = self.ids.generate_task_id();
        self.mutate(|state, now| state.create(id, task, now)).await
    }

    async fn create_chain(&self, tasks: Vec<TaskId>) -> Result<ChainRecord, StoreError> {
        let id = self.ids.generate_chain_id();
        self.mutate(|state, now| state.create_chain(id, tasks, now))
            .await
    }

    async fn transition(&self, id: TaskId, t: Transition) -> Result<TaskRecord, StoreError> {
        self.mutate(|state, now| state.transition(id, t, now)).await
    }

    async fn requeue_interrupted(
        &self,
        id: TaskId,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<TaskRecord, StoreError> {
        self.mutate(|state, now| state.requeue_interrupted(id, not_before, now))
            .await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.state.lock().await.get(id)
    }

    async fn chain(&self, id: ChainId) -> Result<ChainRecord, StoreError> {
        self.state.lock().await.chain(id)
    }

    async fn dependents(&self, id: TaskId) -> Result<Vec<TaskId>, StoreError> {
        self.state.lock().await.dependents(id)
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.state.lock().await.list_by_state(state))
    }

    async fn list_chains(&self) -> Result<Vec<ChainRecord>, StoreError> {
        Ok(self.state.lock().await.list_chains())
    }

    async fn counts_by_state(&self) -> Result<StoreCounts, StoreError> {
        Ok(self.state.lock().await.counts_by_state())
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.mutate(|state, _| Ok(state.purge_finished(before)))
            .await
    }
}
