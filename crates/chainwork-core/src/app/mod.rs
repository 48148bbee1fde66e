//! App - アプリケーション層
//!
//! ports と tasks を組み合わせてスケジューラを実装します。
//!
//! # 主要コンポーネント
//! - **ChainBuilder**: タスク列の検証と TaskStore への登録
//! - **Scheduler**: ライフサイクル（start / submit / cancel / shutdown）
//! - **Executor**: claim → execute → 結果の CAS → 後続の release
//! - **WorkerGroup**: ReadyQueue を消費する固定数のワーカー
//! - **StatusHub**: タスク／チェーン状態の購読
//! - **BlurRepository**: ぼかしパイプラインの窓口

pub mod builder;
pub mod config;
mod executor;
mod ready;
pub mod recovery;
pub mod repository;
pub mod scheduler;
pub mod status;
mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ChainBuilder, TaskSpec};
pub use self::config::{
    ConfigError, DEFAULT_DELAY_FLOOR_MS, DEFAULT_WORKERS, SchedulerConfig, load_json,
};
pub use self::executor::RecoveryReport;
pub use self::recovery::{MAX_BACKOFF, RecoveryAction, RecoveryPolicy};
pub use self::repository::BlurRepository;
pub use self::scheduler::{ChainHandle, Scheduler, SchedulerError, ShutdownMode};
pub use self::status::{
    ChainStatusStream, StatusHub, StatusStream, first_terminal, load_chain_status,
};
