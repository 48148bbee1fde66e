//! Tasks - 実行単位の定義
//!
//! # 実行契約
//! - 入力は毎回まっさらな `Payload`（途中状態に依存しない = 冪等に再実行できる）
//! - 失敗は `Failure` 値で返す（エラー型は scheduler 境界を越えない）
//! - 重い処理は `spawn_blocking` 上で実行し、前後で `checkpoint()` を確認する
//!
//! # 組み込みタスク
//! - **CleanupTask**: 出力ディレクトリを空にする
//! - **TransformTask**: 画像をぼかして中間ファイルに書く
//! - **PersistTask**: 中間ファイルを永続メディアストアに保存する

pub mod cleanup;
pub mod persist;
pub mod registry;
pub mod transform;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Contract, Failure, Payload, TaskId, TaskKind};

pub use self::cleanup::CleanupTask;
pub use self::persist::{PERSIST_TITLE, PersistTask};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::transform::TransformTask;

/// TaskHandler は 1 種類のタスクを実行する
///
/// # 使用例
/// ```ignore
/// struct Thumbnail;
///
/// #[async_trait]
/// impl TaskHandler for Thumbnail {
///     fn kind(&self) -> TaskKind { TaskKind::custom("thumbnail") }
///     fn input_contract(&self) -> Contract { Contract::empty() }
///     fn output_contract(&self) -> Contract { Contract::empty() }
///     async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure> {
///         ctx.checkpoint()?;
///         Ok(Payload::new())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Fields this kind reads from its input.
    fn input_contract(&self) -> Contract;

    /// Fields this kind promises in a successful output.
    fn output_contract(&self) -> Contract;

    async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure>;
}

/// Everything a task body gets from the executor.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub input: Payload,
    cancel: CancellationToken,
    delay_floor: Duration,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        input: Payload,
        cancel: CancellationToken,
        delay_floor: Duration,
    ) -> Self {
        Self {
            task_id,
            input,
            cancel,
            delay_floor,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            Err(Failure::cancelled())
        } else {
            Ok(())
        }
    }

    /// Sleep for the configured latency floor, waking early on cancellation.
    pub async fn wait_delay_floor(&self) -> Result<(), Failure> {
        if self.delay_floor.is_zero() {
            return self.checkpoint();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Failure::cancelled()),
            _ = tokio::time::sleep(self.delay_floor) => Ok(()),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// `spawn_blocking` で同期処理を実行し、結果を `Failure` に揃える
pub async fn run_blocking<T, F>(f: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, Failure> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Failure::error(format!("blocking step aborted: {e}")))?
}

/// Read a required, non-blank locator (or string) field.
pub(crate) fn required_locator(input: &Payload, key: &str) -> Result<String, Failure> {
    input
        .get_locator(key)
        .or_else(|| input.get_str(key))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Failure::error(format!("invalid input: '{key}' is missing or blank")))
}
