//! WorkerGroup - 固定数のワーカーが ReadyQueue から id を取り出して実行する
//!
//! - `request_shutdown()` で新しい仕事の取得をやめる
//! - 実行中のタスクは最後まで走る（キャンセルするかは Scheduler 側が決める）
//! - `shutdown_and_join()` で全ワーカーの終了を待てる

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::executor::Executor;

pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub(crate) fn spawn(n: usize, executor: Arc<Executor>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let executor = Arc::clone(&executor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, executor, &mut rx).await;
            });
            joins.push(join);
        }
        tracing::debug!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub(crate) fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "worker terminated abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    executor: Arc<Executor>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // pop は待つので shutdown と競合させる（pop は cancel-safe）
        let task_id = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // 変更が入ったら次のループで判定
                continue;
            }
            task_id = executor.ready.pop() => task_id,
        };

        tracing::trace!(worker_id, %task_id, "picked task");
        executor.run_one(task_id).await;
    }
    tracing::debug!(worker_id, "worker stopped");
}
