//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ストレージ、画像処理、時刻、ID）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod media;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::media::{Blur, Image, ImageStore, MediaError, MediaStore, OutputDir};
pub use self::task_store::{StoreCounts, TaskStore};
