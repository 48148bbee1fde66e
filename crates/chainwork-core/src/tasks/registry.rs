//! TaskRegistry - kind ごとの Handler 登録
//!
//! Design:
//! - Built during initialization (mutable).
//! - Used during runtime (immutable, shared behind `Arc`).

use std::collections::HashMap;
use std::sync::Arc;

use super::{CleanupTask, PersistTask, TaskHandler, TransformTask};
use crate::domain::TaskKind;
use crate::ports::{Blur, ImageStore, MediaStore, OutputDir};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the three blur pipeline tasks.
    pub fn blur_pipeline(
        images: Arc<dyn ImageStore>,
        blur: Arc<dyn Blur>,
        media: Arc<dyn MediaStore>,
        output_dir: Arc<dyn OutputDir>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(CleanupTask::new(output_dir)))?;
        registry.register(Arc::new(TransformTask::new(Arc::clone(&images), blur)))?;
        registry.register(Arc::new(PersistTask::new(images, media)))?;
        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), RegistryError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted by name.
    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().cloned().collect();
        kinds.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
