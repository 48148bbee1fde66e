//! Durable task store: one JSON snapshot file, rewritten after each mutation.
//!
//! The file is replaced atomically (temp file + fsync + rename), so a crash
//! leaves either the previous snapshot or the new one on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::record_store::{Persistence, RecordStore};
use super::store_state::{Snapshot, StoreState};
use crate::domain::StoreError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// Snapshot file persistence.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Persistence for JsonFile {
    fn is_durable(&self) -> bool {
        true
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

pub type JsonFileTaskStore = RecordStore<JsonFile>;

impl JsonFileTaskStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store; the file is first written on the
    /// first mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::open_with(path, clock, ids).await
    }

    pub async fn open_with(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, StoreError> {
        let file = JsonFile { path: path.into() };
        let state = match tokio::fs::read(&file.path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                StoreState::from_snapshot(snapshot)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %file.path.display(), "task store opened");
        Ok(Self::from_parts(state, file, clock, ids))
    }
}
