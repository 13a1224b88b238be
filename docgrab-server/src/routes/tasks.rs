//! Task submission, polling, download and status streaming.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use docgrab_core::{TaskId, TaskStatusView};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::task::{StartRequest, StartResponse, StatusResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(start_processing, get_status, download, status_events),
    components(schemas(StartRequest, StartResponse, StatusResponse))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start-processing", post(start_processing))
        .route("/status/{task_id}", get(get_status))
        .route("/download/{task_id}", get(download))
        .route("/events/{task_id}", get(status_events))
}

#[utoipa::path(
    post,
    path = "/start-processing",
    tag = "tasks",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Task created and started", body = StartResponse),
        (status = 400, description = "URL is not http(s)"),
        (status = 503, description = "Too many tasks in flight"),
    )
)]
pub async fn start_processing(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, ServerError> {
    let task_id = state.coordinator.submit(&req.url).await?;
    Ok(Json(StartResponse { task_id: task_id.to_string() }))
}

#[utoipa::path(
    get,
    path = "/status/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Id returned at submission")),
    responses((status = 200, description = "Current task status; `unknown` for unrecognised ids", body = StatusResponse))
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Json<StatusResponse> {
    Json(state.coordinator.status_str(&task_id).await.into())
}

#[utoipa::path(
    get,
    path = "/download/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Id returned at submission")),
    responses(
        (status = 200, description = "The generated PDF", body = Vec<u8>, content_type = "application/pdf"),
        (status = 404, description = "Task not found or not completed"),
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response, ServerError> {
    let artifact = state
        .coordinator
        .retrieve_str(&task_id)
        .await
        .ok_or_else(|| ServerError::NotFound("Task not found or not completed".into()))?;

    let disposition = content_disposition(artifact.download_name());
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.content,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/events/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Id returned at submission")),
    responses(
        (status = 200, description = "SSE stream of `status` events, closed after a terminal one", body = String, content_type = "text/event-stream"),
        (status = 404, description = "Unknown task"),
    )
)]
pub async fn status_events(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let not_found = || ServerError::NotFound(format!("task {task_id} not found"));
    let id: TaskId = task_id.parse().map_err(|_| not_found())?;
    let rx = state.coordinator.subscribe(id).await.ok_or_else(not_found)?;

    Ok(Sse::new(status_stream(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// Emit the current status, then every change, ending after a terminal one.
fn status_stream(
    rx: watch::Receiver<TaskStatusView>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((Some(rx), true), |(rx, first)| async move {
        let mut rx = rx?;
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let view = rx.borrow_and_update().clone();
        let next = if view.status.is_terminal() { None } else { Some(rx) };
        Some((view, (next, false)))
    })
    .map(|view| {
        let payload = serde_json::to_string(&StatusResponse::from(view))
            .unwrap_or_else(|_| r#"{"status":"unknown"}"#.to_owned());
        Ok(Event::default().event("status").data(payload))
    })
}

/// `attachment; filename="…"` with an ASCII fallback and an RFC 5987
/// `filename*` for names outside printable ASCII.
fn content_disposition(name: &str) -> HeaderValue {
    let ascii: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("attachment; filename=\"{ascii}\"");
    if ascii != name {
        value.push_str("; filename*=UTF-8''");
        for byte in name.bytes() {
            if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
                value.push(byte as char);
            } else {
                value.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
