use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::runtime::admission::{Admission, Permit};
use crate::runtime::extractor::Extractor;
use crate::runtime::storage::{TaskStore, TaskSummary};
use crate::runtime::types::{
    validate_url, Artifact, CoordinatorError, TaskFailure, TaskId, TaskStatusView,
};

/// Sizing and lifetime limits for the [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Extractions allowed to run at the same time.
    pub max_concurrent: usize,
    /// Accepted tasks allowed to wait for a run slot.
    pub queue_capacity: usize,
    /// Maximum number of task records kept in memory.  Raised to at least
    /// `max_concurrent + queue_capacity`.
    pub store_capacity: usize,
    /// How long a finished record stays retrievable.
    pub ttl: Duration,
    /// Per-task wall clock limit; `None` lets a task run forever.
    pub timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_capacity: 16,
            store_capacity: 256,
            ttl: Duration::from_secs(3600),
            timeout: None,
        }
    }
}

/// Tracks in-flight worker abort handles, keyed by task id.
#[derive(Default)]
struct WorkerHandles {
    handles: Mutex<HashMap<TaskId, AbortHandle>>,
}

impl WorkerHandles {
    fn insert(&self, id: TaskId, handle: AbortHandle) {
        if let Ok(mut map) = self.handles.lock() {
            map.insert(id, handle);
        }
    }

    fn remove(&self, id: TaskId) -> Option<AbortHandle> {
        self.handles.lock().ok().and_then(|mut map| map.remove(&id))
    }

    fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// Accepts submissions, runs one background worker per task and answers
/// status, retrieval, listing and cancellation queries.
///
/// Cheap to clone; all clones share the same store and worker pool.
#[derive(Clone)]
pub struct Coordinator {
    store: TaskStore,
    admission: Admission,
    extractor: Arc<dyn Extractor>,
    timeout: Option<Duration>,
    workers: Arc<WorkerHandles>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("store_capacity", &self.store.capacity())
            .field("admission_limit", &self.admission.limit())
            .field("workers", &self.workers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, extractor: Arc<dyn Extractor>) -> Self {
        let admission = Admission::new(config.max_concurrent, config.queue_capacity);
        let store_capacity = config.store_capacity.max(admission.limit());
        Self {
            store: TaskStore::new(store_capacity, config.ttl),
            admission,
            extractor,
            timeout: config.timeout.filter(|d| !d.is_zero()),
            workers: Arc::new(WorkerHandles::default()),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Validate `url`, record a `processing` task and start its worker.
    ///
    /// Returns as soon as the worker is scheduled; never waits for the
    /// external command.
    pub async fn submit(&self, url: &str) -> Result<TaskId, CoordinatorError> {
        let url = validate_url(url)?.to_owned();
        let permit = self.admission.try_admit()?;
        let task_id = self.store.create(&url).await?;

        info!(task_id = %task_id, url = %url, "task accepted");

        let worker = Worker {
            store: self.store.clone(),
            admission: self.admission.clone(),
            extractor: Arc::clone(&self.extractor),
            timeout: self.timeout,
            workers: Arc::clone(&self.workers),
        };
        // The worker holds off until its abort handle is registered, so its
        // own removal on exit always comes after the insert.
        let (registered_tx, registered_rx) = oneshot::channel();
        let join = tokio::spawn(worker.run(task_id, url, permit, registered_rx));
        self.workers.insert(task_id, join.abort_handle());
        let _ = registered_tx.send(());

        Ok(task_id)
    }

    pub async fn status(&self, task_id: TaskId) -> TaskStatusView {
        self.store.status(task_id).await
    }

    /// Status lookup from an untrusted string; malformed ids are `unknown`.
    pub async fn status_str(&self, task_id: &str) -> TaskStatusView {
        match task_id.parse() {
            Ok(id) => self.status(id).await,
            Err(_) => TaskStatusView::unknown(),
        }
    }

    /// The artifact of a completed task.  Unknown, processing and failed
    /// tasks all yield `None`.
    pub async fn retrieve(&self, task_id: TaskId) -> Option<Artifact> {
        self.store.artifact(task_id).await
    }

    pub async fn retrieve_str(&self, task_id: &str) -> Option<Artifact> {
        self.retrieve(task_id.parse().ok()?).await
    }

    pub async fn subscribe(&self, task_id: TaskId) -> Option<watch::Receiver<TaskStatusView>> {
        self.store.subscribe(task_id).await
    }

    pub async fn list(&self) -> Vec<TaskSummary> {
        self.store.list().await
    }

    /// Stop a processing task.  The task is marked failed before its worker
    /// is aborted, so the worker cannot overwrite the outcome.  Returns
    /// `false` for unknown or already finished tasks.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        if !self.store.fail(task_id, TaskFailure::Cancelled).await {
            return false;
        }
        if let Some(handle) = self.workers.remove(task_id) {
            handle.abort();
        }
        info!(task_id = %task_id, "task cancelled");
        true
    }

    /// Periodically drop expired finished records.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.sweep().await;
                if removed > 0 {
                    debug!(removed, "expired task records swept");
                }
            }
        })
    }
}

/// Everything a background worker needs; owns one task's lifecycle.
struct Worker {
    store: TaskStore,
    admission: Admission,
    extractor: Arc<dyn Extractor>,
    timeout: Option<Duration>,
    workers: Arc<WorkerHandles>,
}

impl Worker {
    async fn run(
        self,
        task_id: TaskId,
        url: String,
        permit: Permit,
        registered: oneshot::Receiver<()>,
    ) {
        let _ = registered.await;
        let _permit = self.admission.wait_run(permit).await;
        debug!(task_id = %task_id, "worker acquired run slot");

        let outcome = self.extract(&url).await;

        let recorded = match outcome {
            Ok(artifact) => {
                info!(task_id = %task_id, filename = %artifact.filename, "task completed");
                self.store.complete(task_id, artifact).await
            }
            Err(failure) => {
                warn!(task_id = %task_id, error = %failure, "task failed");
                self.store.fail(task_id, failure).await
            }
        };
        if !recorded {
            debug!(task_id = %task_id, "task already finished; outcome discarded");
        }
        self.workers.remove(task_id);
    }

    async fn extract(&self, url: &str) -> Result<Artifact, TaskFailure> {
        let extraction = AssertUnwindSafe(self.extractor.extract(url)).catch_unwind();
        let caught = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, extraction).await {
                Ok(caught) => caught,
                Err(_) => return Err(TaskFailure::TimedOut { after: limit }),
            },
            None => extraction.await,
        };
        caught.unwrap_or(Err(TaskFailure::Panicked))
    }
}
