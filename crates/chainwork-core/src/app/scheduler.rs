//! Scheduler - 明示的に起動・停止するスケジューラ本体
//!
//! # ライフサイクル
//! 1. `start()`：設定検証 → クラッシュリカバリ → ワーカー起動
//! 2. `submit_chain()` / `cancel()` / `observe*()`
//! 3. `shutdown()`：Drain（実行中を待つ）か Cancel（実行中に停止要求）

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::builder::{BuildError, ChainBuilder, TaskSpec};
use super::config::{ConfigError, SchedulerConfig};
use super::executor::{Executor, RecoveryReport};
use super::status::{ChainStatusStream, StatusStream, load_chain_status};
use super::worker_loop::WorkerGroup;
use crate::domain::{ChainId, ChainStatus, Payload, StoreError, TaskId, TaskRecord};
use crate::ports::{Clock, StoreCounts, SystemClock, TaskStore};
use crate::tasks::TaskRegistry;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid chain: {0}")]
    Build(#[from] BuildError),

    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("scheduler is shut down")]
    ShutDown,
}

/// Identifies a submitted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainHandle {
    pub chain_id: ChainId,
    pub terminal_task_id: TaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Stop taking work; let in-flight tasks finish.
    #[default]
    Drain,

    /// Stop taking work and ask in-flight tasks to stop. Interrupted tasks
    /// stay `Running` for the next start's recovery.
    Cancel,
}

pub struct Scheduler {
    executor: Arc<Executor>,
    workers: Mutex<Option<WorkerGroup>>,
    recovery: RecoveryReport,
}

impl Scheduler {
    pub async fn start(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
    ) -> Result<Self, SchedulerError> {
        Self::start_with_clock(config, store, registry, Arc::new(SystemClock)).await
    }

    pub async fn start_with_clock(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let workers = config.workers;
        let executor = Arc::new(Executor::new(config, store, Arc::new(registry), clock));

        let recovery = executor.recover().await?;
        let group = WorkerGroup::spawn(workers, Arc::clone(&executor));
        tracing::info!(
            workers,
            delay_floor_ms = executor.config.delay_floor_ms,
            "scheduler started"
        );

        Ok(Self {
            executor,
            workers: Mutex::new(Some(group)),
            recovery,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.executor.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.executor.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.executor.store
    }

    /// What startup recovery did.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    async fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.workers.lock().await.is_none() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }

    /// Validate and persist a chain, then enqueue its head.
    pub async fn submit_chain(
        &self,
        specs: Vec<TaskSpec>,
        initial_input: Payload,
    ) -> Result<ChainHandle, SchedulerError> {
        self.ensure_running().await?;

        let chain = ChainBuilder::new(&self.executor.registry)
            .extend(specs)
            .build(self.executor.store.as_ref(), initial_input)
            .await?;
        tracing::info!(chain_id = %chain.id, tasks = chain.tasks.len(), "chain submitted");

        for id in &chain.tasks {
            let record = self.executor.store.get(*id).await?;
            if record.state.is_runnable() {
                self.executor.ready.push(*id).await;
            }
        }

        Ok(ChainHandle {
            chain_id: chain.id,
            terminal_task_id: chain.terminal_task_id,
        })
    }

    /// Cancel every non-terminal task of the chain.
    pub async fn cancel(&self, handle: &ChainHandle) -> Result<(), SchedulerError> {
        self.executor.cancel_chain(handle.chain_id).await?;
        Ok(())
    }

    /// Push an id onto the ready queue. Duplicates are rejected by the claim.
    pub async fn schedule(&self, task_id: TaskId) {
        self.executor.ready.push(task_id).await;
    }

    pub async fn task(&self, task_id: TaskId) -> Result<TaskRecord, SchedulerError> {
        Ok(self.executor.store.get(task_id).await?)
    }

    pub async fn chain_status(&self, chain_id: ChainId) -> Result<ChainStatus, SchedulerError> {
        Ok(load_chain_status(self.executor.store.as_ref(), chain_id).await?)
    }

    pub async fn counts(&self) -> Result<StoreCounts, SchedulerError> {
        Ok(self.executor.store.counts_by_state().await?)
    }

    pub fn observe(&self, task_id: TaskId) -> StatusStream {
        self.executor.hub.observe(task_id)
    }

    pub fn observe_chain(&self, chain_id: ChainId) -> ChainStatusStream {
        self.executor.hub.observe_chain(chain_id)
    }

    /// Stop the workers and close every open observation. Idempotent.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        let Some(group) = self.workers.lock().await.take() else {
            return;
        };
        tracing::info!(?mode, "scheduler shutting down");
        group.request_shutdown();
        if mode == ShutdownMode::Cancel {
            self.executor.root.cancel();
        }
        group.shutdown_and_join().await;
        self.executor.hub.close();
        tracing::info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::status::first_terminal;
    use crate::domain::{ChainState, Contract, NewTask, TaskKind, TaskState, Transition, ValueType};
    use crate::impls::MemoryTaskStore;
    use crate::testing::{RunLog, Script, ScriptedTask};
    use futures::StreamExt;
    use std::time::Duration;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default().with_delay_floor(Duration::ZERO)
    }

    fn registry(tasks: Vec<ScriptedTask>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for task in tasks {
            registry.register(Arc::new(task)).unwrap();
        }
        registry
    }

    fn spec(name: &str) -> TaskSpec {
        TaskSpec::new(TaskKind::custom(name))
    }

    async fn start(registry: TaskRegistry) -> Scheduler {
        Scheduler::start(config(), Arc::new(MemoryTaskStore::new()), registry)
            .await
            .unwrap()
    }

    async fn wait_chain(scheduler: &Scheduler, handle: &ChainHandle) -> ChainStatus {
        tokio::time::timeout(
            Duration::from_secs(5),
            first_terminal(scheduler.observe_chain(handle.chain_id)),
        )
        .await
        .expect("chain did not finish in time")
        .expect("chain stream ended without a terminal status")
    }

    async fn states(scheduler: &Scheduler, handle: &ChainHandle) -> Vec<TaskState> {
        let chain = scheduler.store().chain(handle.chain_id).await.unwrap();
        let mut states = Vec::new();
        for id in chain.tasks {
            states.push(scheduler.task(id).await.unwrap().state);
        }
        states
    }

    #[tokio::test]
    async fn chain_runs_in_dependency_order() {
        let log = Arc::new(RunLog::default());
        let scheduler = start(registry(
            ["a", "b", "c"]
                .into_iter()
                .map(|n| ScriptedTask::echo(n).with_log(log.clone()))
                .collect(),
        ))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("a"), spec("b"), spec("c")], Payload::new())
            .await
            .unwrap();
        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Succeeded);

        let chain = scheduler.store().chain(handle.chain_id).await.unwrap();
        assert_eq!(log.runs(), chain.tasks);
        for pair in chain.tasks.windows(2) {
            let before = scheduler.task(pair[0]).await.unwrap();
            let after = scheduler.task(pair[1]).await.unwrap();
            assert!(after.started_at.unwrap() >= before.finished_at.unwrap());
        }
        assert_eq!(log.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn output_flows_through_wiring() {
        let scheduler = start(registry(vec![
            ScriptedTask::new(
                TaskKind::custom("emit"),
                Script::Emit(Payload::new().with_int("n", 7)),
            ),
            ScriptedTask::echo("echo"),
        ]))
        .await;

        let handle = scheduler
            .submit_chain(
                vec![
                    spec("emit"),
                    TaskSpec::seeded(TaskKind::custom("echo"), Payload::new().with_str("seed", "s")),
                ],
                Payload::new(),
            )
            .await
            .unwrap();

        let status = wait_chain(&scheduler, &handle).await;
        let output = status.output.unwrap();
        assert_eq!(output.get_int("n"), Some(7));
        assert_eq!(output.get_str("seed"), Some("s"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_scheduling_runs_once() {
        let log = Arc::new(RunLog::default());
        let scheduler = Arc::new(
            Scheduler::start(
                config().with_workers(4),
                Arc::new(MemoryTaskStore::new()),
                registry(vec![
                    ScriptedTask::new(
                        TaskKind::custom("slow"),
                        Script::Hold(Duration::from_millis(50)),
                    )
                    .with_log(log.clone()),
                ]),
            )
            .await
            .unwrap(),
        );

        let handle = scheduler
            .submit_chain(vec![spec("slow")], Payload::new())
            .await
            .unwrap();
        let mut pushes = Vec::new();
        for _ in 0..20 {
            let scheduler = Arc::clone(&scheduler);
            pushes.push(tokio::spawn(async move {
                scheduler.schedule(handle.terminal_task_id).await;
            }));
        }
        for push in pushes {
            push.await.unwrap();
        }

        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Succeeded);
        assert_eq!(log.max_per_task(), 1);
        assert_eq!(log.runs().len(), 1);
        assert_eq!(scheduler.task(handle.terminal_task_id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn failure_blocks_dependents_forever() {
        let log = Arc::new(RunLog::default());
        let scheduler = start(registry(vec![
            ScriptedTask::echo("a").with_log(log.clone()),
            ScriptedTask::new(TaskKind::custom("bad"), Script::Fail("boom")).with_log(log.clone()),
            ScriptedTask::echo("c").with_log(log.clone()),
        ]))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("a"), spec("bad"), spec("c")], Payload::new())
            .await
            .unwrap();
        let status = wait_chain(&scheduler, &handle).await;
        assert_eq!(status.state, ChainState::Failed);
        assert!(status.output.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            states(&scheduler, &handle).await,
            vec![TaskState::Succeeded, TaskState::Failed, TaskState::Blocked]
        );
        assert_eq!(log.runs().len(), 2);

        let bad = scheduler.store().chain(handle.chain_id).await.unwrap().tasks[1];
        assert_eq!(scheduler.task(bad).await.unwrap().failure.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn panicking_body_fails_the_task() {
        let scheduler = start(registry(vec![ScriptedTask::new(
            TaskKind::custom("panic"),
            Script::Panic,
        )]))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("panic")], Payload::new())
            .await
            .unwrap();
        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Failed);

        // The worker survived and still runs new work.
        let again = scheduler
            .submit_chain(vec![spec("panic")], Payload::new())
            .await
            .unwrap();
        assert_eq!(wait_chain(&scheduler, &again).await.state, ChainState::Failed);
    }

    #[tokio::test]
    async fn output_contract_violation_fails_the_task() {
        let scheduler = start(registry(vec![
            ScriptedTask::echo("liar")
                .with_contracts(Contract::empty(), Contract::empty().field("promised", ValueType::Str)),
        ]))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("liar")], Payload::new())
            .await
            .unwrap();
        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Failed);
        let record = scheduler.task(handle.terminal_task_id).await.unwrap();
        assert!(record.failure.unwrap().contains("promised"));
    }

    #[tokio::test]
    async fn cancel_while_running_stops_the_chain() {
        let log = Arc::new(RunLog::default());
        let scheduler = start(registry(vec![
            ScriptedTask::new(TaskKind::custom("hold"), Script::Hold(Duration::from_secs(30)))
                .with_log(log.clone()),
            ScriptedTask::echo("after").with_log(log.clone()),
        ]))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("hold"), spec("after")], Payload::new())
            .await
            .unwrap();
        let head = scheduler.store().chain(handle.chain_id).await.unwrap().tasks[0];
        let mut head_states = scheduler.observe(head);
        while let Some(record) = head_states.next().await {
            if record.state == TaskState::Running {
                break;
            }
        }

        scheduler.cancel(&handle).await.unwrap();

        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            states(&scheduler, &handle).await,
            vec![TaskState::Cancelled, TaskState::Cancelled]
        );
        assert_eq!(log.runs(), vec![head]);
    }

    #[tokio::test]
    async fn cancel_mid_chain_keeps_finished_steps() {
        let last = Arc::new(RunLog::default());
        let scheduler = start(registry(vec![
            ScriptedTask::echo("first"),
            ScriptedTask::new(TaskKind::custom("hold"), Script::Hold(Duration::from_secs(30))),
            ScriptedTask::echo("last").with_log(last.clone()),
        ]))
        .await;

        let handle = scheduler
            .submit_chain(vec![spec("first"), spec("hold"), spec("last")], Payload::new())
            .await
            .unwrap();
        let middle = scheduler.store().chain(handle.chain_id).await.unwrap().tasks[1];
        let mut middle_states = scheduler.observe(middle);
        while let Some(record) = middle_states.next().await {
            if record.state == TaskState::Running {
                break;
            }
        }

        scheduler.cancel(&handle).await.unwrap();

        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            states(&scheduler, &handle).await,
            vec![TaskState::Succeeded, TaskState::Cancelled, TaskState::Cancelled]
        );
        assert!(last.runs().is_empty());
    }

    #[tokio::test]
    async fn invalid_chain_is_rejected_up_front() {
        let scheduler = start(registry(vec![ScriptedTask::echo("a")])).await;
        let err = scheduler
            .submit_chain(vec![spec("a"), spec("missing")], Payload::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Build(BuildError::UnregisteredKind { step: 1, .. })
        ));
        assert_eq!(scheduler.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn recovery_requeues_interrupted_tasks() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let head = store
            .create(NewTask::new(TaskKind::custom("a"), Payload::new()))
            .await
            .unwrap();
        let tail = store
            .create(NewTask::new(TaskKind::custom("b"), Payload::new()).depends_on(head))
            .await
            .unwrap();
        let chain = store.create_chain(vec![head, tail]).await.unwrap();
        // Simulate a crash mid-execution.
        store.transition(head, Transition::start()).await.unwrap();

        let scheduler = Scheduler::start(
            config(),
            Arc::clone(&store),
            registry(vec![ScriptedTask::echo("a"), ScriptedTask::echo("b")]),
        )
        .await
        .unwrap();
        assert_eq!(scheduler.recovery_report().requeued, 1);

        let handle = ChainHandle {
            chain_id: chain.id,
            terminal_task_id: tail,
        };
        assert_eq!(wait_chain(&scheduler, &handle).await.state, ChainState::Succeeded);
        assert_eq!(scheduler.task(head).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn recovery_can_fail_interrupted_tasks() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let id = store
            .create(NewTask::new(TaskKind::custom("a"), Payload::new()))
            .await
            .unwrap();
        store.transition(id, Transition::start()).await.unwrap();

        let scheduler = Scheduler::start(
            config().with_recovery(crate::app::RecoveryPolicy::Fail),
            Arc::clone(&store),
            registry(vec![ScriptedTask::echo("a")]),
        )
        .await
        .unwrap();

        assert_eq!(scheduler.recovery_report().failed, 1);
        assert_eq!(scheduler.task(id).await.unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn recovery_backoff_survives_many_interruptions() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let id = store
            .create(NewTask::new(TaskKind::custom("a"), Payload::new()))
            .await
            .unwrap();
        for _ in 0..40 {
            store.transition(id, Transition::start()).await.unwrap();
            store.requeue_interrupted(id, None).await.unwrap();
        }
        store.transition(id, Transition::start()).await.unwrap();

        let before = chrono::Utc::now();
        let scheduler = Scheduler::start(
            config().with_recovery(crate::app::RecoveryPolicy::RetryWithBackoff {
                max_attempts: 100,
                base_delay_ms: 1000,
                multiplier: 10.0,
            }),
            Arc::clone(&store),
            registry(vec![ScriptedTask::echo("a")]),
        )
        .await
        .unwrap();

        assert_eq!(scheduler.recovery_report().requeued, 1);
        let record = scheduler.task(id).await.unwrap();
        assert_eq!(record.state, TaskState::Enqueued);
        let not_before = record.not_before.expect("backoff must be persisted");
        let max = chrono::Duration::from_std(crate::app::MAX_BACKOFF).unwrap();
        assert!(not_before >= before + max);
        assert!(not_before <= chrono::Utc::now() + max);
    }

    #[tokio::test]
    async fn recovery_releases_tasks_stuck_behind_a_success() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let head = store
            .create(NewTask::new(TaskKind::custom("a"), Payload::new()))
            .await
            .unwrap();
        let tail = store
            .create(NewTask::new(TaskKind::custom("b"), Payload::new()).depends_on(head))
            .await
            .unwrap();
        let chain = store.create_chain(vec![head, tail]).await.unwrap();
        store.transition(head, Transition::start()).await.unwrap();
        store
            .transition(head, Transition::succeed(Payload::new().with_int("n", 1)))
            .await
            .unwrap();

        let scheduler = Scheduler::start(
            config(),
            Arc::clone(&store),
            registry(vec![ScriptedTask::echo("a"), ScriptedTask::echo("b")]),
        )
        .await
        .unwrap();
        assert_eq!(scheduler.recovery_report().released, 1);

        let handle = ChainHandle {
            chain_id: chain.id,
            terminal_task_id: tail,
        };
        let status = wait_chain(&scheduler, &handle).await;
        assert_eq!(status.output.unwrap().get_int("n"), Some(1));
    }

    #[tokio::test]
    async fn cancel_shutdown_leaves_work_for_recovery() {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let hold = || {
            registry(vec![ScriptedTask::new(
                TaskKind::custom("hold"),
                Script::Hold(Duration::from_millis(100)),
            )])
        };

        let first = Scheduler::start(config(), Arc::clone(&store), hold())
            .await
            .unwrap();
        let handle = first
            .submit_chain(vec![spec("hold")], Payload::new())
            .await
            .unwrap();
        let mut observed = first.observe(handle.terminal_task_id);
        while let Some(record) = observed.next().await {
            if record.state == TaskState::Running {
                break;
            }
        }

        first.shutdown(ShutdownMode::Cancel).await;
        assert_eq!(
            store.get(handle.terminal_task_id).await.unwrap().state,
            TaskState::Running
        );
        assert!(matches!(
            first.submit_chain(vec![spec("hold")], Payload::new()).await,
            Err(SchedulerError::ShutDown)
        ));

        let second = Scheduler::start(config(), Arc::clone(&store), hold())
            .await
            .unwrap();
        assert_eq!(wait_chain(&second, &handle).await.state, ChainState::Succeeded);
        second.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test]
    async fn drain_shutdown_finishes_in_flight_work() {
        let scheduler = start(registry(vec![ScriptedTask::new(
            TaskKind::custom("hold"),
            Script::Hold(Duration::from_millis(50)),
        )]))
        .await;
        let handle = scheduler
            .submit_chain(vec![spec("hold")], Payload::new())
            .await
            .unwrap();
        let mut observed = scheduler.observe(handle.terminal_task_id);
        while let Some(record) = observed.next().await {
            if record.state == TaskState::Running {
                break;
            }
        }

        scheduler.shutdown(ShutdownMode::Drain).await;
        assert_eq!(
            scheduler.task(handle.terminal_task_id).await.unwrap().state,
            TaskState::Succeeded
        );
    }
}
