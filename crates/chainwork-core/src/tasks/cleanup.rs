//! Cleanup: remove the intermediate files left by earlier transforms.

use std::sync::Arc;

use async_trait::async_trait;

use super::{TaskContext, TaskHandler, run_blocking};
use crate::domain::{Contract, Failure, Payload, TaskKind};
use crate::ports::OutputDir;

pub struct CleanupTask {
    output_dir: Arc<dyn OutputDir>,
}

impl CleanupTask {
    pub fn new(output_dir: Arc<dyn OutputDir>) -> Self {
        Self { output_dir }
    }
}

#[async_trait]
impl TaskHandler for CleanupTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Cleanup
    }

    fn input_contract(&self) -> Contract {
        Contract::empty()
    }

    fn output_contract(&self) -> Contract {
        Contract::empty()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure> {
        ctx.wait_delay_floor().await?;
        ctx.checkpoint()?;

        let output_dir = Arc::clone(&self.output_dir);
        let result = run_blocking(move || {
            let files = output_dir
                .list_files()
                .map_err(|e| Failure::error(format!("cannot list output directory: {e}")))?;
            for file in &files {
                output_dir
                    .delete(file)
                    .map_err(|e| Failure::error(format!("cannot delete {}: {e}", file.display())))?;
            }
            Ok(files.len())
        })
        .await;

        match result {
            Ok(removed) => {
                tracing::debug!(task_id = %ctx.task_id, removed, "output directory cleaned");
                Ok(Payload::new())
            }
            Err(failure) => {
                tracing::error!(task_id = %ctx.task_id, %failure, "cleanup failed");
                Err(failure)
            }
        }
    }
}
