//! Transform: blur the input image and write it as an intermediate file.

use std::sync::Arc;

use async_trait::async_trait;

use super::{TaskContext, TaskHandler, required_locator, run_blocking};
use crate::domain::{Contract, Failure, KEY_BLUR_LEVEL, KEY_IMAGE_URI, Payload, TaskKind, ValueType};
use crate::ports::{Blur, ImageStore};

/// Blur level used when the input carries none.
pub const DEFAULT_BLUR_LEVEL: i64 = 1;

pub struct TransformTask {
    images: Arc<dyn ImageStore>,
    blur: Arc<dyn Blur>,
}

impl TransformTask {
    pub fn new(images: Arc<dyn ImageStore>, blur: Arc<dyn Blur>) -> Self {
        Self { images, blur }
    }
}

fn blur_level(input: &Payload) -> Result<u32, Failure> {
    let level = input.get_int(KEY_BLUR_LEVEL).unwrap_or(DEFAULT_BLUR_LEVEL);
    u32::try_from(level)
        .map_err(|_| Failure::error(format!("invalid input: blur level {level} is out of range")))
}

#[async_trait]
impl TaskHandler for TransformTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Transform
    }

    fn input_contract(&self) -> Contract {
        Contract::empty()
            .field(KEY_IMAGE_URI, ValueType::Locator)
            .optional(KEY_BLUR_LEVEL, ValueType::Int)
    }

    fn output_contract(&self) -> Contract {
        Contract::empty().field(KEY_IMAGE_URI, ValueType::Locator)
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure> {
        ctx.wait_delay_floor().await?;

        let prepared = required_locator(&ctx.input, KEY_IMAGE_URI)
            .and_then(|uri| Ok((uri, blur_level(&ctx.input)?)));
        let (uri, level) = match prepared {
            Ok(prepared) => prepared,
            Err(failure) => {
                tracing::error!(task_id = %ctx.task_id, input = ?ctx.input, %failure, "error applying blur");
                return Err(failure);
            }
        };
        ctx.checkpoint()?;

        let images = Arc::clone(&self.images);
        let blur = Arc::clone(&self.blur);
        let source = uri.clone();
        let result = run_blocking(move || {
            let image = images
                .load(&source)
                .map_err(|e| Failure::error(e.to_string()))?;
            let blurred = if level == 0 {
                image
            } else {
                blur.blur(&image, level)
            };
            images
                .save(&blurred)
                .map_err(|e| Failure::error(e.to_string()))
        })
        .await;

        let output_uri = match result {
            Ok(locator) => locator,
            Err(failure) => {
                tracing::error!(task_id = %ctx.task_id, image_uri = %uri, level, %failure, "error applying blur");
                return Err(failure);
            }
        };
        ctx.checkpoint()?;

        tracing::debug!(task_id = %ctx.task_id, from = %uri, to = %output_uri, level, "image blurred");
        Ok(Payload::new().with_locator(KEY_IMAGE_URI, output_uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Image;
    use crate::testing::{InvertBlur, MemoryImages, context};
    use rstest::rstest;

    fn task(images: &Arc<MemoryImages>) -> TransformTask {
        TransformTask::new(images.clone(), Arc::new(InvertBlur))
    }

    fn source(images: &MemoryImages) -> String {
        images.insert("mem://source", Image::new(1, 1, vec![10, 20, 30, 255]))
    }

    #[tokio::test]
    async fn writes_blurred_copy() {
        let images = Arc::new(MemoryImages::default());
        let uri = source(&images);

        let output = task(&images)
            .execute(context(
                Payload::new()
                    .with_locator(KEY_IMAGE_URI, uri.as_str())
                    .with_int(KEY_BLUR_LEVEL, 3),
            ))
            .await
            .unwrap();

        let out_uri = output.get_locator(KEY_IMAGE_URI).unwrap();
        assert_ne!(out_uri, uri);
        assert_eq!(images.get(out_uri).unwrap().pixels, vec![245, 235, 225, 255]);
    }

    #[tokio::test]
    async fn level_zero_copies_input_unchanged() {
        let images = Arc::new(MemoryImages::default());
        let uri = source(&images);

        let output = task(&images)
            .execute(context(
                Payload::new()
                    .with_locator(KEY_IMAGE_URI, uri.as_str())
                    .with_int(KEY_BLUR_LEVEL, 0),
            ))
            .await
            .unwrap();

        let out_uri = output.get_locator(KEY_IMAGE_URI).unwrap();
        assert_eq!(images.get(out_uri), images.get(&uri));
    }

    #[tokio::test]
    async fn missing_level_defaults_to_one() {
        assert_eq!(blur_level(&Payload::new()).unwrap(), 1);
    }

    #[rstest]
    #[case::blank_uri(Payload::new().with_locator(KEY_IMAGE_URI, " "))]
    #[case::missing_uri(Payload::new().with_int(KEY_BLUR_LEVEL, 1))]
    #[case::negative_level(Payload::new().with_locator(KEY_IMAGE_URI, "mem://source").with_int(KEY_BLUR_LEVEL, -1))]
    #[case::undecodable(Payload::new().with_locator(KEY_IMAGE_URI, "mem://nowhere"))]
    #[tokio::test]
    async fn bad_input_fails(#[case] input: Payload) {
        let images = Arc::new(MemoryImages::default());
        source(&images);

        let failure = task(&images).execute(context(input)).await.unwrap_err();
        assert!(!failure.is_cancelled());
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_skips_the_write() {
        let images = Arc::new(MemoryImages::default());
        let uri = source(&images);
        let ctx = context(Payload::new().with_locator(KEY_IMAGE_URI, uri.as_str()));
        ctx.cancellation_token().cancel();

        let failure = task(&images).execute(ctx).await.unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(images.len(), 1);
    }
}
