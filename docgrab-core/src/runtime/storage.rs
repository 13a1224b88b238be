use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::runtime::types::{Artifact, CoordinatorError, TaskFailure, TaskId, TaskStatus, TaskStatusView};

/// Stored lifecycle state.  Status, error detail and artifact live in one
/// enum so a reader can never observe a half-written record.
#[derive(Debug, Clone)]
enum TaskState {
    Processing,
    Completed(Artifact),
    Failed(TaskFailure),
}

impl TaskState {
    fn view(&self) -> TaskStatusView {
        match self {
            TaskState::Processing => TaskStatusView::processing(),
            TaskState::Completed(_) => TaskStatusView::completed(),
            TaskState::Failed(f) => TaskStatusView::error(f.to_string()),
        }
    }
}

/// The complete in-memory record for a single submitted task.
#[derive(Debug)]
struct TaskRecord {
    url: String,
    state: TaskState,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    /// Pushes every state change to subscribers.
    status_tx: watch::Sender<TaskStatusView>,
}

/// Listing entry for a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub url: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Bounded, thread-safe task record storage.
///
/// Uses a `tokio::sync::RwLock<HashMap>` so status queries run concurrently
/// while workers write terminal states.  Terminal records expire after `ttl`;
/// when the map is at `capacity` the oldest terminal record is evicted to
/// make room.  Processing records are never evicted.
#[derive(Debug, Clone)]
pub struct TaskStore {
    inner: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    capacity: usize,
    ttl: Duration,
}

impl TaskStore {
    pub fn new(capacity: usize, ttl: std::time::Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a new id and insert a `processing` record for `url`.
    pub async fn create(&self, url: &str) -> Result<TaskId, CoordinatorError> {
        self.create_at(url, Utc::now()).await
    }

    pub(crate) async fn create_at(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskId, CoordinatorError> {
        let mut guard = self.inner.write().await;

        if guard.len() >= self.capacity {
            Self::remove_expired(&mut guard, now, self.ttl);
        }
        if guard.len() >= self.capacity {
            let oldest = guard
                .iter()
                .filter_map(|(id, r)| r.finished_at.map(|at| (at, *id)))
                .min()
                .map(|(_, id)| id);
            match oldest {
                Some(id) => {
                    guard.remove(&id);
                    debug!(task_id = %id, "evicted oldest finished task to make room");
                }
                None => return Err(CoordinatorError::StoreFull { capacity: self.capacity }),
            }
        }

        let mut task_id = TaskId::new();
        while guard.contains_key(&task_id) {
            task_id = TaskId::new();
        }

        let (status_tx, _) = watch::channel(TaskStatusView::processing());
        guard.insert(
            task_id,
            TaskRecord {
                url: url.to_owned(),
                state: TaskState::Processing,
                created_at: now,
                finished_at: None,
                status_tx,
            },
        );
        Ok(task_id)
    }

    /// Transition `processing → completed`.  Returns `false` if the task is
    /// unknown or already terminal.
    pub async fn complete(&self, task_id: TaskId, artifact: Artifact) -> bool {
        self.finish(task_id, TaskState::Completed(artifact)).await
    }

    /// Transition `processing → error`.  Returns `false` if the task is
    /// unknown or already terminal.
    pub async fn fail(&self, task_id: TaskId, failure: TaskFailure) -> bool {
        self.finish(task_id, TaskState::Failed(failure)).await
    }

    async fn finish(&self, task_id: TaskId, state: TaskState) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(&task_id) else {
            return false;
        };
        if !matches!(record.state, TaskState::Processing) {
            return false;
        }
        record.state = state;
        record.finished_at = Some(Utc::now());
        record.status_tx.send_replace(record.state.view());
        true
    }

    /// Return a snapshot of the task status; `unknown` for missing ids.
    pub async fn status(&self, task_id: TaskId) -> TaskStatusView {
        self.inner
            .read()
            .await
            .get(&task_id)
            .map(|r| r.state.view())
            .unwrap_or_else(TaskStatusView::unknown)
    }

    /// Return the artifact of a `completed` task.
    pub async fn artifact(&self, task_id: TaskId) -> Option<Artifact> {
        match &self.inner.read().await.get(&task_id)?.state {
            TaskState::Completed(artifact) => Some(artifact.clone()),
            _ => None,
        }
    }

    pub async fn subscribe(&self, task_id: TaskId) -> Option<watch::Receiver<TaskStatusView>> {
        self.inner
            .read()
            .await
            .get(&task_id)
            .map(|r| r.status_tx.subscribe())
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<TaskSummary> {
        let guard = self.inner.read().await;
        let mut out: Vec<TaskSummary> = guard
            .iter()
            .map(|(id, r)| {
                let view = r.state.view();
                TaskSummary {
                    id: *id,
                    url: r.url.clone(),
                    status: view.status,
                    error: view.error,
                    filename: match &r.state {
                        TaskState::Completed(a) => Some(a.filename.clone()),
                        _ => None,
                    },
                    created_at: r.created_at,
                    finished_at: r.finished_at,
                }
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Drop terminal records older than the ttl.  Returns how many were
    /// removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    pub(crate) async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.inner.write().await;
        Self::remove_expired(&mut guard, now, self.ttl)
    }

    fn remove_expired(
        map: &mut HashMap<TaskId, TaskRecord>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> usize {
        let before = map.len();
        map.retain(|_, r| match r.finished_at {
            Some(at) => at.checked_add_signed(ttl).is_none_or(|expiry| expiry > now),
            None => true,
        });
        before - map.len()
    }

    #[cfg(test)]
    pub(crate) async fn set_finished_at(&self, task_id: TaskId, at: DateTime<Utc>) {
        if let Some(record) = self.inner.write().await.get_mut(&task_id) {
            record.finished_at = Some(at);
        }
    }
}
