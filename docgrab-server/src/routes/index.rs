//! The HTML form page.
//!
//! `POST /` accepts the classic form submission.  It goes through the same
//! [`Coordinator::submit`](docgrab_core::Coordinator::submit) path as
//! `POST /start-processing`, so a returned task id is always being worked on.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use docgrab_core::CoordinatorError;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::task::{FormSubmission, StartResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(index_page, index_submit), components(schemas(FormSubmission, StartResponse)))]
pub struct IndexApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index_page).post(index_submit))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "page",
    responses((status = 200, description = "HTML form page", body = String, content_type = "text/html"))
)]
pub async fn index_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ServerError> {
    Ok(Html(state.pages.index(None, None)?))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "page",
    request_body(content = FormSubmission, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Task started, or the form re-rendered with an error", body = StartResponse),
        (status = 503, description = "Too many tasks in flight"),
    )
)]
pub async fn index_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FormSubmission>,
) -> Result<Response, ServerError> {
    let url = form.url.unwrap_or_default();
    match state.coordinator.submit(&url).await {
        Ok(task_id) => Ok(Json(StartResponse { task_id: task_id.to_string() }).into_response()),
        Err(CoordinatorError::InvalidUrl) => {
            debug!(url = %url, "form submission rejected");
            let page = state.pages.index(Some(&CoordinatorError::InvalidUrl.to_string()), None)?;
            Ok(Html(page).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
