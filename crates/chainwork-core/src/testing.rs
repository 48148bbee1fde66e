//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::domain::{
    ChainId, ChainRecord, Contract, Failure, NewTask, Payload, StoreError, TaskId, TaskKind,
    TaskRecord, TaskState, Transition,
};
use crate::impls::MemoryTaskStore;
use crate::ports::{
    Blur, Image, ImageStore, MediaError, MediaStore, OutputDir, StoreCounts, TaskStore,
};
use crate::tasks::{TaskContext, TaskHandler};

/// Fresh context with no latency floor.
pub(crate) fn context(input: Payload) -> TaskContext {
    TaskContext::new(
        TaskId::from_ulid(Ulid::new()),
        input,
        CancellationToken::new(),
        Duration::ZERO,
    )
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// ImageStore keyed by locator strings; saves as `mem://out-N`.
#[derive(Default)]
pub(crate) struct MemoryImages {
    images: Mutex<HashMap<String, Image>>,
    saved: AtomicUsize,
}

impl MemoryImages {
    pub(crate) fn insert(&self, locator: &str, image: Image) -> String {
        lock(&self.images).insert(locator.to_string(), image);
        locator.to_string()
    }

    pub(crate) fn get(&self, locator: &str) -> Option<Image> {
        lock(&self.images).get(locator).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.images).len()
    }
}

impl ImageStore for MemoryImages {
    fn load(&self, locator: &str) -> Result<Image, MediaError> {
        self.get(locator).ok_or_else(|| MediaError::Decode {
            locator: locator.to_string(),
            reason: "no such image".to_string(),
        })
    }

    fn save(&self, image: &Image) -> Result<String, MediaError> {
        let n = self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(&format!("mem://out-{n}"), image.clone()))
    }
}

/// Deterministic stand-in for a blur: inverts the color channels.
pub(crate) struct InvertBlur;

impl Blur for InvertBlur {
    fn blur(&self, image: &Image, _level: u32) -> Image {
        let pixels = image
            .pixels
            .chunks(4)
            .flat_map(|px| match px {
                [r, g, b, a] => [255 - r, 255 - g, 255 - b, *a],
                _ => [0, 0, 0, 0],
            })
            .collect();
        Image::new(image.width, image.height, pixels)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredImage {
    pub title: String,
    pub description: String,
    pub locator: String,
}

/// MediaStore that remembers every call.
#[derive(Default)]
pub(crate) struct RecordingMediaStore {
    stored: Mutex<Vec<StoredImage>>,
    fixed_locator: Option<String>,
}

impl RecordingMediaStore {
    /// Always answer `locator`, even a blank one.
    pub(crate) fn returning(locator: &str) -> Self {
        Self {
            stored: Mutex::default(),
            fixed_locator: Some(locator.to_string()),
        }
    }

    pub(crate) fn stored(&self) -> Vec<StoredImage> {
        lock(&self.stored).clone()
    }
}

impl MediaStore for RecordingMediaStore {
    fn store(&self, _image: &Image, title: &str, description: &str) -> Result<String, MediaError> {
        let mut stored = lock(&self.stored);
        let locator = self
            .fixed_locator
            .clone()
            .unwrap_or_else(|| format!("gallery://{}", stored.len()));
        stored.push(StoredImage {
            title: title.to_string(),
            description: description.to_string(),
            locator: locator.clone(),
        });
        Ok(locator)
    }
}

/// OutputDir over an in-memory file list.
#[derive(Default)]
pub(crate) struct ScratchDir {
    files: Mutex<Vec<PathBuf>>,
    undeletable: Mutex<Option<PathBuf>>,
}

impl ScratchDir {
    pub(crate) fn with_files<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let dir = Self::default();
        lock(&dir.files).extend(names.into_iter().map(PathBuf::from));
        dir
    }

    pub(crate) fn files(&self) -> Vec<PathBuf> {
        lock(&self.files).clone()
    }

    pub(crate) fn fail_delete(&self, path: PathBuf) {
        *lock(&self.undeletable) = Some(path);
    }
}

impl OutputDir for ScratchDir {
    fn list_files(&self) -> std::io::Result<Vec<PathBuf>> {
        Ok(self.files())
    }

    fn delete(&self, path: &Path) -> std::io::Result<()> {
        if lock(&self.undeletable).as_deref() == Some(path) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            ));
        }
        lock(&self.files).retain(|f| f != path);
        Ok(())
    }
}

/// Concurrency bookkeeping for scripted tasks.
#[derive(Default)]
pub(crate) struct RunLog {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    per_task: Mutex<HashMap<TaskId, usize>>,
    max_per_task: AtomicUsize,
    runs: Mutex<Vec<TaskId>>,
}

impl RunLog {
    fn enter(&self, id: TaskId) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut per_task = lock(&self.per_task);
        let count = per_task.entry(id).or_default();
        *count += 1;
        self.max_per_task.fetch_max(*count, Ordering::SeqCst);
        lock(&self.runs).push(id);
    }

    fn exit(&self, id: TaskId) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = lock(&self.per_task).get_mut(&id) {
            *count -= 1;
        }
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions of any single task id.
    pub(crate) fn max_per_task(&self) -> usize {
        self.max_per_task.load(Ordering::SeqCst)
    }

    pub(crate) fn runs(&self) -> Vec<TaskId> {
        lock(&self.runs).clone()
    }
}

struct RunGuard<'a> {
    log: &'a RunLog,
    id: TaskId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.log.exit(self.id);
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Return the input as output.
    Echo,
    /// Return this payload.
    Emit(Payload),
    Fail(&'static str),
    Panic,
    /// Wait (cancellably), then echo.
    Hold(Duration),
}

pub(crate) struct ScriptedTask {
    kind: TaskKind,
    script: Script,
    input: Contract,
    output: Contract,
    log: Arc<RunLog>,
}

impl ScriptedTask {
    pub(crate) fn new(kind: TaskKind, script: Script) -> Self {
        Self {
            kind,
            script,
            input: Contract::empty(),
            output: Contract::empty(),
            log: Arc::default(),
        }
    }

    pub(crate) fn echo(name: &str) -> Self {
        Self::new(TaskKind::custom(name), Script::Echo)
    }

    pub(crate) fn with_contracts(mut self, input: Contract, output: Contract) -> Self {
        self.input = input;
        self.output = output;
        self
    }

    pub(crate) fn with_log(mut self, log: Arc<RunLog>) -> Self {
        self.log = log;
        self
    }
}

#[async_trait]
impl TaskHandler for ScriptedTask {
    fn kind(&self) -> TaskKind {
        self.kind.clone()
    }

    fn input_contract(&self) -> Contract {
        self.input.clone()
    }

    fn output_contract(&self) -> Contract {
        self.output.clone()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Payload, Failure> {
        self.log.enter(ctx.task_id);
        let _guard = RunGuard {
            log: &self.log,
            id: ctx.task_id,
        };
        ctx.wait_delay_floor().await?;

        match &self.script {
            Script::Echo => Ok(ctx.input.clone()),
            Script::Emit(payload) => Ok(payload.clone()),
            Script::Fail(reason) => Err(Failure::error(*reason)),
            Script::Panic => panic!("scripted panic in {}", self.kind),
            Script::Hold(d) => {
                tokio::select! {
                    _ = ctx.cancellation_token().cancelled() => Err(Failure::cancelled()),
                    _ = tokio::time::sleep(*d) => Ok(ctx.input.clone()),
                }
            }
        }
    }
}

/// MemoryTaskStore with hooks for timing and failure injection.
#[derive(Default)]
pub(crate) struct HookedStore {
    inner: MemoryTaskStore,
    pause_on_claim: bool,
    claimed: Notify,
    resume: Notify,
    creates_left: Mutex<Option<usize>>,
}

impl HookedStore {
    /// Every successful claim waits for [`HookedStore::resume`].
    pub(crate) fn pausing_on_claim() -> Self {
        Self {
            pause_on_claim: true,
            ..Self::default()
        }
    }

    /// `create` fails once `n` tasks have been created.
    pub(crate) fn failing_after_creates(n: usize) -> Self {
        Self {
            creates_left: Mutex::new(Some(n)),
            ..Self::default()
        }
    }

    pub(crate) async fn wait_claimed(&self) {
        self.claimed.notified().await;
    }

    pub(crate) fn resume(&self) {
        self.resume.notify_one();
    }
}

#[async_trait]
impl TaskStore for HookedStore {
    async fn create(&self, task: NewTask) -> Result<TaskId, StoreError> {
        if let Some(left) = lock(&self.creates_left).as_mut() {
            if *left == 0 {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            *left -= 1;
        }
        self.inner.create(task).await
    }

    async fn create_chain(&self, tasks: Vec<TaskId>) -> Result<ChainRecord, StoreError> {
        self.inner.create_chain(tasks).await
    }

    async fn transition(&self, id: TaskId, t: Transition) -> Result<TaskRecord, StoreError> {
        let claim = t.next == TaskState::Running;
        let record = self.inner.transition(id, t).await?;
        if claim && self.pause_on_claim {
            self.claimed.notify_one();
            self.resume.notified().await;
        }
        Ok(record)
    }

    async fn requeue_interrupted(
        &self,
        id: TaskId,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<TaskRecord, StoreError> {
        self.inner.requeue_interrupted(id, not_before).await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn chain(&self, id: ChainId) -> Result<ChainRecord, StoreError> {
        self.inner.chain(id).await
    }

    async fn dependents(&self, id: TaskId) -> Result<Vec<TaskId>, StoreError> {
        self.inner.dependents(id).await
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_by_state(state).await
    }

    async fn list_chains(&self) -> Result<Vec<ChainRecord>, StoreError> {
        self.inner.list_chains().await
    }

    async fn counts_by_state(&self) -> Result<StoreCounts, StoreError> {
        self.inner.counts_by_state().await
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.purge_finished(before).await
    }
}
