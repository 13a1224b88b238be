//! Operator endpoints under `/admin`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use docgrab_core::TaskId;
use serde_json::{json, Value};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::auth;
use crate::schemas::task::TaskResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_tasks, cancel_task), components(schemas(TaskResponse)))]
pub struct AdminApi;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}

#[utoipa::path(
    get,
    path = "/admin/tasks",
    tag = "admin",
    responses(
        (status = 200, description = "All tasks held in memory, newest first", body = [TaskResponse]),
        (status = 401, description = "Missing or wrong bearer token"),
    )
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskResponse>> {
    let tasks = state.coordinator.list().await;
    Json(tasks.into_iter().map(TaskResponse::from).collect())
}

#[utoipa::path(
    post,
    path = "/admin/tasks/{task_id}/cancel",
    tag = "admin",
    params(("task_id" = String, Path, description = "Task to cancel")),
    responses(
        (status = 200, description = "Task cancelled", body = Value),
        (status = 400, description = "Task already finished"),
        (status = 401, description = "Missing or wrong bearer token"),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let not_found = || ServerError::NotFound(format!("task {task_id} not found"));
    let id: TaskId = task_id.parse().map_err(|_| not_found())?;

    if !state.coordinator.cancel(id).await {
        let view = state.coordinator.status(id).await;
        return Err(match view.status {
            docgrab_core::TaskStatus::Unknown => not_found(),
            status => ServerError::BadRequest(format!(
                "task {task_id} is not cancellable (status: {status})"
            )),
        });
    }

    Ok(Json(json!({ "status": "cancelled" })))
}
