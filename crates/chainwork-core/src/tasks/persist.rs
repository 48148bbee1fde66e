//! Persist: copy the intermediate image into permanent media storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{TaskContext, TaskHandler, required_locator, run_blocking};
use crate::domain::{Contract, Failure, KEY_IMAGE_URI, Payload, TaskKind, ValueType};
use crate::ports::{Clock, ImageStore, MediaStore, SystemClock};

pub const PERSIST_TITLE: &str = "Blurred Image";

fn describe(at: DateTime<Utc>) -> String {
    at.format("%Y.%m.%d at %H:%M:%S UTC").to_string()
}

pub struct PersistTask {
    images: Arc<dyn ImageStore>,
    media: Arc<dyn MediaStore>,
    clock: Arc<dyn Clock>,
}

impl PersistTask {
    pub fn new(images: Arc<dyn ImageStore>, media: Arc<dyn MediaStore>) -> Self {
        Self {
            images,
            media,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TaskHandler for PersistTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Persist
    }

    fn input_contract(&self) -> Contract {
        Contract::empty().field(KEY_IMAGE_URI, ValueType::Locator)
    }

    fn output_contract(&self) -> Contract {
        Contract::empty().field(KEY_IMAGE_URI, ValueType::Str)
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure> {
        ctx.wait_delay_floor().await?;

        let uri = required_locator(&ctx.input, KEY_IMAGE_URI).inspect_err(|failure| {
            tracing::error!(task_id = %ctx.task_id, input = ?ctx.input, %failure, "invalid persist input");
        })?;
        ctx.checkpoint()?;

        let images = Arc::clone(&self.images);
        let media = Arc::clone(&self.media);
        let description = describe(self.clock.now());
        let source = uri.clone();
        let result = run_blocking(move || {
            let image = images
                .load(&source)
                .map_err(|e| Failure::error(e.to_string()))?;
            let stored = media
                .store(&image, PERSIST_TITLE, &description)
                .map_err(|e| Failure::error(e.to_string()))?;
            if stored.trim().is_empty() {
                return Err(Failure::error("writing to media store failed"));
            }
            Ok(stored)
        })
        .await;

        match result {
            Ok(public_uri) => {
                tracing::info!(task_id = %ctx.task_id, image_uri = %public_uri, "image persisted");
                Ok(Payload::new().with_str(KEY_IMAGE_URI, public_uri))
            }
            Err(failure) => {
                tracing::error!(task_id = %ctx.task_id, image_uri = %uri, %failure, "persist failed");
                Err(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, Image};
    use crate::testing::{MemoryImages, RecordingMediaStore, context};
    use chrono::TimeZone;

    fn fixture(media: RecordingMediaStore) -> (Arc<MemoryImages>, Arc<RecordingMediaStore>, PersistTask) {
        let images = Arc::new(MemoryImages::default());
        images.insert("mem://blurred", Image::new(1, 1, vec![1, 2, 3, 4]));
        let media = Arc::new(media);
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap(),
        ));
        let task = PersistTask::new(images.clone(), media.clone()).with_clock(clock);
        (images, media, task)
    }

    #[tokio::test]
    async fn stores_with_title_and_timestamp() {
        let (_, media, task) = fixture(RecordingMediaStore::default());

        let output = task
            .execute(context(
                Payload::new().with_locator(KEY_IMAGE_URI, "mem://blurred"),
            ))
            .await
            .unwrap();

        let stored = media.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, PERSIST_TITLE);
        assert_eq!(stored[0].description, "2024.03.09 at 07:05:01 UTC");
        assert_eq!(output.get_str(KEY_IMAGE_URI), Some(stored[0].locator.as_str()));
    }

    #[tokio::test]
    async fn blank_locator_from_media_store_fails() {
        let (_, _, task) = fixture(RecordingMediaStore::returning(""));

        let failure = task
            .execute(context(
                Payload::new().with_locator(KEY_IMAGE_URI, "mem://blurred"),
            ))
            .await
            .unwrap_err();
        assert!(failure.reason.contains("media store"));
    }

    #[tokio::test]
    async fn undecodable_input_fails() {
        let (_, media, task) = fixture(RecordingMediaStore::default());

        let result = task
            .execute(context(
                Payload::new().with_locator(KEY_IMAGE_URI, "mem://missing"),
            ))
            .await;
        assert!(result.is_err());
        assert!(media.stored().is_empty());
    }

    #[tokio::test]
    async fn missing_uri_fails() {
        let (_, _, task) = fixture(RecordingMediaStore::default());
        assert!(task.execute(context(Payload::new())).await.is_err());
    }
}
