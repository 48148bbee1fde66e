//! Media ports - 画像処理とストレージの外部協力者
//!
//! スケジューラはこれらの内部実装に依存しません。
//! すべて同期 API で、タスク側が `spawn_blocking` 上で呼び出します。

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA bytes, `width * height * 4` long.
    pub pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("cannot decode image at {locator}: {reason}")]
    Decode { locator: String, reason: String },

    #[error("cannot encode image: {0}")]
    Encode(String),

    #[error("media store rejected the image: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 中間画像の読み書き（Transform の出力は出力ディレクトリに置かれる）
pub trait ImageStore: Send + Sync {
    fn load(&self, locator: &str) -> Result<Image, MediaError>;

    /// Write an intermediate image and return its locator.
    fn save(&self, image: &Image) -> Result<String, MediaError>;
}

/// `blur(image, level) -> image`（純粋関数）
pub trait Blur: Send + Sync {
    fn blur(&self, image: &Image, level: u32) -> Image;
}

/// 永続メディアストレージ。公開ロケータを返す（空文字列は失敗扱い）
pub trait MediaStore: Send + Sync {
    fn store(&self, image: &Image, title: &str, description: &str) -> Result<String, MediaError>;
}

/// Cleanup が掃除する出力ディレクトリ
pub trait OutputDir: Send + Sync {
    /// Regular files currently in the directory. A missing directory is empty.
    fn list_files(&self) -> std::io::Result<Vec<PathBuf>>;

    fn delete(&self, path: &Path) -> std::io::Result<()>;
}
