use docgrab_core::{TaskStatusView, TaskSummary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /start-processing`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartRequest {
    /// Document URL; must start with `http://` or `https://`.
    pub url: String,
}

/// Form body of `POST /`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct FormSubmission {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartResponse {
    #[serde(rename = "taskId")]
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// One of `processing`, `completed`, `error`, `unknown`.
    pub status: String,
    /// Diagnostic detail; only present when `status` is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskStatusView> for StatusResponse {
    fn from(view: TaskStatusView) -> Self {
        Self { status: view.status.to_string(), error: view.error }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskResponse {
    pub id: String,
    pub url: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl From<TaskSummary> for TaskResponse {
    fn from(t: TaskSummary) -> Self {
        Self {
            id: t.id.to_string(),
            url: t.url,
            status: t.status.to_string(),
            error: t.error,
            filename: t.filename,
            created_at: t.created_at.to_rfc3339(),
            finished_at: t.finished_at.map(|at| at.to_rfc3339()),
        }
    }
}
