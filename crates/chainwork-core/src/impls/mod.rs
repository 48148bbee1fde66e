//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **MemoryTaskStore**: テスト・一時実行用の正本
//! - **JsonFileTaskStore**: JSON スナップショットによる永続ストア
//! - **FsImageStore / ScaleBlur / FsMediaStore / FsOutputDir**: ファイルシステム上の画像処理

pub mod fs_media;
pub mod json_store;
pub mod record_store;
pub(crate) mod store_state;

// 主要な型を再エクスポート
pub use self::fs_media::{
    FsImageStore, FsMediaStore, FsOutputDir, OUTPUT_FILE_PREFIX, ScaleBlur, file_locator,
    locator_path,
};
pub use self::json_store::{JsonFile, JsonFileTaskStore};
pub use self::record_store::{MemoryTaskStore, Persistence, RecordStore, Volatile};
pub use self::store_state::{SNAPSHOT_VERSION, Snapshot};
