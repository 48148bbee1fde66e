//! ChainBuilder - タスク列を 1 本のチェーンとして組み立てる
//!
//! # Fail-fast 設計
//! - `validate()` は純粋関数：ストアに触れずに契約をチェック
//! - 各ステップの必須入力が「seed + 直前タスクの宣言出力」で揃うか確認
//! - 不足・型不一致・未登録 kind があれば BuildError を返す

use std::collections::HashMap;

use crate::domain::{
    ChainRecord, InputBuilder, NewTask, Payload, StoreError, TaskId, TaskKind, Transition,
    ValueType, Wiring,
};
use crate::ports::TaskStore;
use crate::tasks::TaskRegistry;

/// One step of a chain: what to run and how its input is built.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub input: InputBuilder,
}

impl TaskSpec {
    /// Step whose input comes entirely from its predecessor.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            input: InputBuilder::upstream(),
        }
    }

    pub fn seeded(kind: TaskKind, seed: Payload) -> Self {
        Self {
            kind,
            input: InputBuilder::seeded(seed),
        }
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.input = self.input.with_wiring(wiring);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("chain has no tasks")]
    Empty,

    #[error("step {step}: no handler registered for task kind '{kind}'")]
    UnregisteredKind { step: usize, kind: TaskKind },

    #[error("step {step} ({kind}): required input '{field}' is not provided")]
    MissingInput {
        step: usize,
        kind: TaskKind,
        field: String,
    },

    #[error("step {step} ({kind}): input '{field}' is provided as {found}, expected {expected}")]
    TypeMismatch {
        step: usize,
        kind: TaskKind,
        field: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// ChainBuilder は線形チェーンを構築
///
/// # 使用例
/// ```ignore
/// let chain = ChainBuilder::new(&registry)
///     .then(TaskSpec::new(TaskKind::Cleanup))
///     .then(TaskSpec::seeded(TaskKind::Transform, seed))
///     .then(TaskSpec::new(TaskKind::Persist))
///     .build(store.as_ref(), Payload::new())
///     .await?;
/// ```
pub struct ChainBuilder<'a> {
    registry: &'a TaskRegistry,
    specs: Vec<TaskSpec>,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self {
            registry,
            specs: Vec::new(),
        }
    }

    pub fn then(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn extend(mut self, specs: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn specs(&self) -> &[TaskSpec] {
        &self.specs
    }

    /// Seed of step `step`, with the chain's initial input folded into the head.
    fn seed_of(&self, step: usize, initial_input: &Payload) -> Payload {
        let own = &self.specs[step].input.seed;
        if step > 0 {
            return own.clone();
        }
        let mut seed = initial_input.clone();
        seed.merge_from(own, true);
        seed
    }

    /// Check every step's input contract against what its seed and its
    /// predecessor's declared output provide.
    pub fn validate(&self, initial_input: &Payload) -> Result<(), BuildError> {
        if self.specs.is_empty() {
            return Err(BuildError::Empty);
        }

        let mut handlers = Vec::with_capacity(self.specs.len());
        for (step, spec) in self.specs.iter().enumerate() {
            let handler =
                self.registry
                    .get(&spec.kind)
                    .ok_or_else(|| BuildError::UnregisteredKind {
                        step,
                        kind: spec.kind.clone(),
                    })?;
            handlers.push(handler);
        }

        for (step, spec) in self.specs.iter().enumerate() {
            let seed = self.seed_of(step, initial_input);
            let upstream = match step {
                0 => Vec::new(),
                _ => vec![handlers[step - 1].output_contract()],
            };
            let upstream_refs: Vec<_> = upstream.iter().collect();
            let available: HashMap<String, ValueType> =
                spec.input.wiring.available_fields(&seed, &upstream_refs);

            for field in handlers[step].input_contract().fields() {
                match available.get(&field.name) {
                    None if field.required => {
                        return Err(BuildError::MissingInput {
                            step,
                            kind: spec.kind.clone(),
                            field: field.name.clone(),
                        });
                    }
                    Some(found) if *found != field.ty => {
                        return Err(BuildError::TypeMismatch {
                            step,
                            kind: spec.kind.clone(),
                            field: field.name.clone(),
                            expected: field.ty,
                            found: *found,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Validate, then create every task (`depends_on = [previous]`) and the
    /// chain record.
    ///
    /// If the store fails part-way, the tasks created so far are cancelled so
    /// recovery never picks up a half-built chain.
    pub async fn build(
        self,
        store: &dyn TaskStore,
        initial_input: Payload,
    ) -> Result<ChainRecord, BuildError> {
        self.validate(&initial_input)?;

        let mut created: Vec<TaskId> = Vec::with_capacity(self.specs.len());
        let result = self.create_all(store, &initial_input, &mut created).await;
        match result {
            Ok(chain) => Ok(chain),
            Err(e) => {
                for id in &created {
                    if let Ok(record) = store.get(*id).await
                        && !record.state.is_terminal()
                    {
                        if let Err(rollback) =
                            store.transition(*id, Transition::cancel(record.state)).await
                        {
                            tracing::warn!(task_id = %id, error = %rollback, "cannot cancel partially built chain");
                        }
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn create_all(
        &self,
        store: &dyn TaskStore,
        initial_input: &Payload,
        created: &mut Vec<TaskId>,
    ) -> Result<ChainRecord, StoreError> {
        for (step, spec) in self.specs.iter().enumerate() {
            let mut task = NewTask::new(spec.kind.clone(), self.seed_of(step, initial_input))
                .with_wiring(spec.input.wiring.clone());
            if let Some(previous) = created.last() {
                task = task.depends_on(*previous);
            }
            created.push(store.create(task).await?);
        }
        store.create_chain(created.clone()).await
    }
}
