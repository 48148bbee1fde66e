//! Ready queue: task ids waiting for a worker.
//!
//! The queue holds ids only; the store stays the source of truth. A stale or
//! duplicate id is harmless because the claim CAS rejects it.

use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::TaskId;

/// Deadline used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Delayed entry for the min-heap.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Delayed {
    run_at: Instant,
    task_id: TaskId,
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

#[derive(Default)]
struct ReadyState {
    ready: VecDeque<TaskId>,
    delayed: BinaryHeap<Delayed>,
}

impl ReadyState {
    /// Move delayed entries whose time has come to the FIFO.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.delayed.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(entry) = self.delayed.pop() {
                self.ready.push_back(entry.task_id);
            }
        }
    }
}

#[derive(Default)]
pub struct ReadyQueue {
    state: Mutex<ReadyState>,
    notify: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, task_id: TaskId) {
        self.state.lock().await.ready.push_back(task_id);
        self.notify.notify_one();
    }

    pub async fn push_after(&self, task_id: TaskId, delay: Duration) {
        if delay.is_zero() {
            return self.push(task_id).await;
        }
        let now = Instant::now();
        let run_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.state.lock().await.delayed.push(Delayed { run_at, task_id });
        // Wake a waiter so it re-arms its timer for the new deadline.
        self.notify.notify_one();
    }

    /// Wait for the next ready id.
    ///
    /// Cancel-safe: an id is only removed in the same poll that returns it.
    pub async fn pop(&self) -> TaskId {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_due(Instant::now());
                if let Some(task_id) = state.ready.pop_front() {
                    return task_id;
                }
                state.delayed.peek().map(|entry| entry.run_at)
            };

            // Wait for notification OR next delayed entry
            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
