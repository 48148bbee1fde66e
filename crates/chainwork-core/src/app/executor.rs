//! Executor - 1 タスク分の実行と、その前後の状態遷移
//!
//! pop → claim (CAS Enqueued→Running) → execute → CAS 結果 → 後続の release
//!
//! # 不変条件
//! - 状態の変更はすべて TaskStore の CAS を通す
//! - Conflict は「他の誰かが先に遷移させた」合図：ログだけ残して何もしない
//! - IllegalTransition はスケジューラのバグ：error ログを出して呼び出しを打ち切る

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::SchedulerConfig;
use super::ready::ReadyQueue;
use super::recovery::RecoveryAction;
use super::status::{StatusHub, load_chain_status};
use crate::domain::{
    ChainId, Failure, Payload, StoreError, TaskId, TaskRecord, TaskState, Transition,
};
use crate::ports::{Clock, TaskStore};
use crate::tasks::{TaskContext, TaskRegistry};

/// What one recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub failed: usize,
    pub released: usize,
    pub resumed: usize,
}

pub(crate) struct Executor {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ready: ReadyQueue,
    pub(crate) hub: StatusHub,

    /// Parent of every chain token; cancelled only by `ShutdownMode::Cancel`.
    pub(crate) root: CancellationToken,
    chain_tokens: Mutex<HashMap<ChainId, CancellationToken>>,
}

/// Conflicts are routine; invariant violations are bugs.
fn log_store_error(err: &StoreError, id: TaskId, action: &str) {
    if err.is_conflict() {
        tracing::debug!(task_id = %id, error = %err, "{action}: lost CAS, skipping");
    } else if err.is_invariant_violation() {
        tracing::error!(task_id = %id, error = %err, "{action}: invariant violated");
    } else {
        tracing::warn!(task_id = %id, error = %err, "{action}: store error");
    }
}

impl Executor {
    pub(crate) fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = StatusHub::new(Arc::clone(&store));
        Self {
            config,
            store,
            registry,
            clock,
            ready: ReadyQueue::new(),
            hub,
            root: CancellationToken::new(),
            chain_tokens: Mutex::new(HashMap::new()),
        }
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<ChainId, CancellationToken>> {
        self.chain_tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token shared by every task of a chain; created on first use.
    pub(crate) fn chain_token(&self, chain_id: Option<ChainId>) -> CancellationToken {
        match chain_id {
            Some(id) => self
                .tokens()
                .entry(id)
                .or_insert_with(|| self.root.child_token())
                .clone(),
            None => self.root.child_token(),
        }
    }

    fn forget_chain(&self, chain_id: ChainId) {
        self.tokens().remove(&chain_id);
    }

    /// Publish a task transition and, for chained tasks, the chain status.
    pub(crate) async fn publish(&self, record: &TaskRecord) {
        self.hub.publish_task(record);
        let Some(chain_id) = record.chain_id else {
            return;
        };
        match load_chain_status(self.store.as_ref(), chain_id).await {
            Ok(status) => {
                if status.state.is_terminal() {
                    tracing::info!(%chain_id, state = %status.state, "chain finished");
                    self.forget_chain(chain_id);
                }
                self.hub.publish_chain(&status);
            }
            Err(e) => tracing::warn!(%chain_id, error = %e, "cannot derive chain status"),
        }
    }

    /// CAS `t` onto `id` and publish the result. `None` when the CAS did
    /// not apply.
    async fn apply(&self, id: TaskId, t: Transition, action: &str) -> Option<TaskRecord> {
        match self.store.transition(id, t).await {
            Ok(record) => {
                self.publish(&record).await;
                Some(record)
            }
            Err(e) => {
                log_store_error(&e, id, action);
                None
            }
        }
    }

    /// Claim and run one task to completion.
    pub(crate) async fn run_one(&self, id: TaskId) {
        // Taken before the claim so a cancel racing the claim either
        // conflicts with it or leaves this token already cancelled.
        let token = match self.store.get(id).await {
            Ok(record) if record.state == TaskState::Enqueued => self.chain_token(record.chain_id),
            Ok(record) => {
                tracing::debug!(task_id = %id, state = %record.state, "claim: not enqueued, skipping");
                return;
            }
            Err(e) => {
                log_store_error(&e, id, "claim");
                return;
            }
        };
        let Some(record) = self.apply(id, Transition::start(), "claim").await else {
            return;
        };
        tracing::info!(task_id = %id, kind = %record.kind, attempt = record.attempts, "task started");

        let outcome = self.execute(&record, token).await;
        match outcome {
            Ok(output) => {
                if self
                    .apply(id, Transition::succeed(output), "complete")
                    .await
                    .is_some()
                {
                    tracing::info!(task_id = %id, kind = %record.kind, "task succeeded");
                    self.release_dependents(id).await;
                }
            }
            Err(failure) if failure.is_cancelled() => {
                if self.root.is_cancelled() {
                    // Left Running: recovery decides at the next start.
                    tracing::info!(task_id = %id, "task interrupted by shutdown");
                    return;
                }
                self.apply(id, Transition::cancel(TaskState::Running), "cancel")
                    .await;
            }
            Err(failure) => {
                tracing::warn!(task_id = %id, kind = %record.kind, reason = %failure.reason, "task failed");
                self.apply(id, Transition::fail(failure.reason), "fail")
                    .await;
            }
        }
    }

    /// Look up the handler, check contracts, run the body in its own tokio
    /// task.
    async fn execute(
        &self,
        record: &TaskRecord,
        chain_token: CancellationToken,
    ) -> Result<Payload, Failure> {
        let handler = self.registry.get(&record.kind).ok_or_else(|| {
            Failure::error(format!("no handler registered for kind '{}'", record.kind))
        })?;
        handler
            .input_contract()
            .check(&record.input)
            .map_err(|v| Failure::error(format!("invalid input: {v}")))?;

        let ctx = TaskContext::new(
            record.id,
            record.input.clone(),
            chain_token.child_token(),
            self.config.delay_floor(),
        );
        let body = Arc::clone(&handler);
        let output = match tokio::spawn(async move { body.execute(ctx).await }).await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => {
                tracing::error!(task_id = %record.id, kind = %record.kind, "task body panicked");
                return Err(Failure::error("task body panicked"));
            }
            Err(e) => return Err(Failure::error(format!("task body aborted: {e}"))),
        };

        handler
            .output_contract()
            .check(&output)
            .map_err(|v| Failure::error(format!("output contract violated: {v}")))?;
        Ok(output)
    }

    /// Release every `Blocked` dependent whose predecessors all succeeded.
    pub(crate) async fn release_dependents(&self, id: TaskId) {
        let dependents = match self.store.dependents(id).await {
            Ok(dependents) => dependents,
            Err(e) => {
                log_store_error(&e, id, "list dependents");
                return;
            }
        };
        for dependent in dependents {
            if self.try_release(dependent).await {
                self.ready.push(dependent).await;
            }
        }
    }

    /// Build the wired input and CAS `Blocked -> Enqueued`.
    async fn try_release(&self, id: TaskId) -> bool {
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(e) => {
                log_store_error(&e, id, "release");
                return false;
            }
        };
        if record.state != TaskState::Blocked {
            return false;
        }

        let mut upstream = Vec::with_capacity(record.depends_on.len());
        for dep in &record.depends_on {
            match self.store.get(*dep).await {
                Ok(r) if r.state == TaskState::Succeeded => {
                    upstream.push(r.output.unwrap_or_default());
                }
                Ok(_) => return false,
                Err(e) => {
                    log_store_error(&e, *dep, "release");
                    return false;
                }
            }
        }

        let input = record.wiring.apply(&record.input, &upstream);
        self.apply(id, Transition::release(input), "release")
            .await
            .is_some()
    }

    /// Cancel every non-terminal task of a chain and signal in-flight bodies.
    pub(crate) async fn cancel_chain(&self, chain_id: ChainId) -> Result<(), StoreError> {
        let chain = self.store.chain(chain_id).await?;
        self.chain_token(Some(chain_id)).cancel();

        for id in &chain.tasks {
            self.cancel_task(*id).await?;
        }
        self.forget_chain(chain_id);
        tracing::info!(%chain_id, "chain cancelled");
        Ok(())
    }

    async fn cancel_task(&self, id: TaskId) -> Result<(), StoreError> {
        loop {
            let record = self.store.get(id).await?;
            if record.state.is_terminal() {
                return Ok(());
            }
            match self
                .store
                .transition(id, Transition::cancel(record.state))
                .await
            {
                Ok(record) => {
                    self.publish(&record).await;
                    return Ok(());
                }
                // Moved under us; look again.
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reconcile the store after a restart, before any worker runs.
    pub(crate) async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();
        let enqueued = self.store.list_by_state(TaskState::Enqueued).await?;

        for record in self.store.list_by_state(TaskState::Running).await? {
            match self.config.recovery.decide(record.attempts) {
                RecoveryAction::Requeue { delay } => {
                    let not_before = (!delay.is_zero())
                        .then(|| chrono::Duration::from_std(delay).ok())
                        .flatten()
                        .map(|d| self.clock.now() + d);
                    let requeued = self.store.requeue_interrupted(record.id, not_before).await?;
                    self.publish(&requeued).await;
                    self.ready.push_after(record.id, delay).await;
                    tracing::info!(task_id = %record.id, ?delay, "interrupted task requeued");
                    report.requeued += 1;
                }
                RecoveryAction::Fail { reason } => {
                    let failed = self
                        .store
                        .transition(record.id, Transition::fail(reason))
                        .await?;
                    self.publish(&failed).await;
                    tracing::warn!(task_id = %record.id, "interrupted task marked failed");
                    report.failed += 1;
                }
            }
        }

        // Crash between a success and the release of its dependents.
        for record in self.store.list_by_state(TaskState::Blocked).await? {
            if self.try_release(record.id).await {
                self.ready.push(record.id).await;
                report.released += 1;
            }
        }

        for record in enqueued {
            self.ready.push_after(record.id, self.remaining_delay(&record)).await;
            report.resumed += 1;
        }

        if report != RecoveryReport::default() {
            tracing::info!(?report, "recovery complete");
        }
        Ok(report)
    }

    fn remaining_delay(&self, record: &TaskRecord) -> Duration {
        record
            .not_before
            .and_then(|at| (at - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}
