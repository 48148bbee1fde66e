//! StatusHub - タスク／チェーンの状態購読
//!
//! # 購読の契約
//! - 遅延評価：最初の poll で購読を開始する（作るだけでは何も起きない）
//! - 購読時点の現在値を最初に返し、その後の遷移を順に返す
//! - 終端レコードを返したらストリームは終わる（未知の id は即終了）
//! - 購読はスケジューリングに一切影響しない
//!
//! 現在値の読み出しと購読登録の間に発生した遷移は、状態の進行度で重複排除する。

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::domain::{
    ChainId, ChainState, ChainStatus, StatusRecord, StoreError, TaskId, TaskRecord, TaskState,
    Terminal,
};
use crate::ports::TaskStore;

pub type StatusStream = Pin<Box<dyn Stream<Item = StatusRecord> + Send>>;

pub type ChainStatusStream = Pin<Box<dyn Stream<Item = ChainStatus> + Send>>;

/// Derive the current status of a chain from the store.
pub async fn load_chain_status(
    store: &dyn TaskStore,
    chain_id: ChainId,
) -> Result<ChainStatus, StoreError> {
    let chain = store.chain(chain_id).await?;
    let mut tasks: Vec<TaskRecord> = Vec::with_capacity(chain.tasks.len());
    for id in &chain.tasks {
        tasks.push(store.get(*id).await?);
    }
    Ok(ChainStatus::derive(&chain, &tasks))
}

/// Consume a status stream until its first terminal record.
///
/// `None` when the stream ends first (unknown id, hub closed).
pub async fn first_terminal<S, R>(stream: S) -> Option<R>
where
    S: Stream<Item = R>,
    R: Terminal,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(record) = stream.next().await {
        if record.is_terminal() {
            return Some(record);
        }
    }
    None
}

/// Progress of a task state; a record is only delivered if it moves past
/// the last one delivered.
fn task_rank(state: TaskState) -> u8 {
    match state {
        TaskState::Blocked => 0,
        TaskState::Enqueued => 1,
        TaskState::Running => 2,
        TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled => 3,
    }
}

fn chain_rank(state: ChainState) -> u8 {
    match state {
        ChainState::Pending => 0,
        ChainState::Running => 1,
        ChainState::Succeeded | ChainState::Failed | ChainState::Cancelled => 2,
    }
}

type Subscribers<K, R> = HashMap<K, Vec<mpsc::UnboundedSender<R>>>;

#[derive(Default)]
struct Topics {
    tasks: Subscribers<TaskId, StatusRecord>,
    chains: Subscribers<ChainId, ChainStatus>,
    closed: bool,
}

/// Keyed fan-out of status records to independent subscribers.
#[derive(Clone)]
pub struct StatusHub {
    store: Arc<dyn TaskStore>,
    topics: Arc<Mutex<Topics>>,
}

fn fan_out<K, R>(subs: &mut Subscribers<K, R>, key: &K, record: &R)
where
    K: std::hash::Hash + Eq,
    R: Clone,
{
    if let Some(senders) = subs.get_mut(key) {
        senders.retain(|tx| tx.send(record.clone()).is_ok());
        if senders.is_empty() {
            subs.remove(key);
        }
    }
}

impl StatusHub {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            topics: Arc::new(Mutex::new(Topics::default())),
        }
    }

    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish_task(&self, record: &TaskRecord) {
        let status = StatusRecord::from(record);
        fan_out(&mut self.topics().tasks, &record.id, &status);
    }

    pub fn publish_chain(&self, status: &ChainStatus) {
        fan_out(&mut self.topics().chains, &status.chain_id, status);
    }

    /// Drop every subscription; open streams end without a terminal record.
    pub fn close(&self) {
        let mut topics = self.topics();
        topics.closed = true;
        topics.tasks.clear();
        topics.chains.clear();
    }

    /// Number of live task and chain subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let topics = self.topics();
        topics.tasks.values().map(Vec::len).sum::<usize>()
            + topics.chains.values().map(Vec::len).sum::<usize>()
    }

    fn subscribe_task(&self, id: TaskId) -> Option<mpsc::UnboundedReceiver<StatusRecord>> {
        let mut topics = self.topics();
        if topics.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        topics.tasks.entry(id).or_default().push(tx);
        Some(rx)
    }

    fn subscribe_chain(&self, id: ChainId) -> Option<mpsc::UnboundedReceiver<ChainStatus>> {
        let mut topics = self.topics();
        if topics.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        topics.chains.entry(id).or_default().push(tx);
        Some(rx)
    }

    /// Watch one task. Each call is an independent, restartable observation.
    pub fn observe(&self, task_id: TaskId) -> StatusStream {
        let hub = self.clone();
        Box::pin(async_stream::stream! {
            // Register before reading so no transition slips between the two.
            let rx = hub.subscribe_task(task_id);
            let current = match hub.store.get(task_id).await {
                Ok(record) => StatusRecord::from(&record),
                Err(e) => {
                    tracing::debug!(%task_id, error = %e, "observe: no such task");
                    return;
                }
            };
            let mut last = task_rank(current.state);
            let done = current.is_terminal();
            yield current;
            if done {
                return;
            }

            let Some(mut rx) = rx else { return };
            while let Some(record) = rx.recv().await {
                let rank = task_rank(record.state);
                if rank <= last {
                    continue;
                }
                last = rank;
                let done = record.is_terminal();
                yield record;
                if done {
                    break;
                }
            }
        })
    }

    /// Watch the derived status of a whole chain.
    ///
    /// Consecutive identical statuses are collapsed.
    pub fn observe_chain(&self, chain_id: ChainId) -> ChainStatusStream {
        let hub = self.clone();
        Box::pin(async_stream::stream! {
            let rx = hub.subscribe_chain(chain_id);
            let current = match load_chain_status(hub.store.as_ref(), chain_id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!(%chain_id, error = %e, "observe_chain: no such chain");
                    return;
                }
            };
            let mut last = current.state;
            let done = current.is_terminal();
            yield current;
            if done {
                return;
            }

            let Some(mut rx) = rx else { return };
            while let Some(status) = rx.recv().await {
                if chain_rank(status.state) <= chain_rank(last) {
                    continue;
                }
                last = status.state;
                let done = status.is_terminal();
                yield status;
                if done {
                    break;
                }
            }
        })
    }
}
