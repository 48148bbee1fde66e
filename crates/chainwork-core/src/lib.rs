//! chainwork-core
//!
//! Durable work-chain scheduler: ordered chains of typed tasks, persisted so
//! they survive a restart, observed through per-task and per-chain status
//! streams.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, kind, state, payload, contract, wiring, record, status, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, ImageStore, Blur, MediaStore, OutputDir, Clock, IdGenerator）
//! - **tasks**: TaskHandler と組み込みタスク（Cleanup, Transform, Persist）
//! - **app**: アプリケーションロジック（builder, scheduler, executor, status, repository）
//! - **impls**: 実装（MemoryTaskStore, JsonFileTaskStore, ファイルシステム上の画像ストア）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod tasks;

#[cfg(test)]
mod testing;
