//! BlurRepository - ぼかしパイプラインの薄い窓口
//!
//! `[Cleanup, Transform, Persist]` を組み立てて投入し、チェーンの最初の終端状態を待つ。
//! 成功時だけ公開ロケータを返し、それ以外はすべて `None`。

use std::sync::Arc;

use tokio::sync::Mutex;

use super::builder::TaskSpec;
use super::scheduler::{ChainHandle, Scheduler, SchedulerError};
use super::status::first_terminal;
use crate::domain::{ChainState, KEY_BLUR_LEVEL, KEY_IMAGE_URI, Payload, TaskKind};

pub struct BlurRepository {
    scheduler: Arc<Scheduler>,
    image_uri: String,
    last: Mutex<Option<ChainHandle>>,
}

impl BlurRepository {
    pub fn new(scheduler: Arc<Scheduler>, image_uri: impl Into<String>) -> Self {
        Self {
            scheduler,
            image_uri: image_uri.into(),
            last: Mutex::new(None),
        }
    }

    pub fn image_uri(&self) -> &str {
        &self.image_uri
    }

    /// The most recently submitted chain.
    pub async fn last_chain(&self) -> Option<ChainHandle> {
        *self.last.lock().await
    }

    fn specs(&self, level: i64) -> Vec<TaskSpec> {
        vec![
            TaskSpec::new(TaskKind::Cleanup),
            TaskSpec::seeded(
                TaskKind::Transform,
                Payload::new()
                    .with_locator(KEY_IMAGE_URI, self.image_uri.as_str())
                    .with_int(KEY_BLUR_LEVEL, level),
            ),
            TaskSpec::new(TaskKind::Persist),
        ]
    }

    /// Submit the chain without waiting for it.
    pub async fn submit_blur(&self, level: i64) -> Result<ChainHandle, SchedulerError> {
        let handle = self
            .scheduler
            .submit_chain(self.specs(level), Payload::new())
            .await?;
        *self.last.lock().await = Some(handle);
        Ok(handle)
    }

    /// Blur the image and persist it. `Some(locator)` only when every step
    /// succeeded.
    pub async fn apply_blur(&self, level: i64) -> Option<String> {
        let handle = match self.submit_blur(level).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "cannot submit blur chain");
                return None;
            }
        };

        let status = first_terminal(self.scheduler.observe_chain(handle.chain_id)).await?;
        if status.state != ChainState::Succeeded {
            tracing::warn!(chain_id = %handle.chain_id, state = %status.state, "blur chain did not succeed");
            return None;
        }
        status
            .output
            .and_then(|output| output.get_str(KEY_IMAGE_URI).map(str::to_string))
    }

    /// Cancel the most recent chain, if any.
    pub async fn cancel_work(&self) {
        let Some(handle) = self.last_chain().await else {
            return;
        };
        if let Err(e) = self.scheduler.cancel(&handle).await {
            tracing::warn!(chain_id = %handle.chain_id, error = %e, "cannot cancel blur chain");
        }
    }
}
