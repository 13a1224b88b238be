use crate::error::ServerError;
use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Request bodies larger than this are not echoed into the log.
const MAX_LOGGED_BODY: usize = 1024;

/// Wrap each request in a span carrying a trace id, log small JSON/form
/// request bodies, and report status and latency.
///
/// Request bodies are buffered up to `max_body_bytes`; anything larger is
/// refused with 413 before a handler runs.  Response bodies are never
/// buffered: downloads and SSE streams must pass through untouched.
pub async fn trace_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("→ request started");
        let (parts, body) = req.into_parts();

        let req_bytes = match buffer_and_log(&parts.headers, body, state.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let response = e.into_response();
                info!(status = response.status().as_u16(), "← request body rejected");
                return response;
            }
        };
        let mut req = Request::from_parts(parts, Body::from(req_bytes));

        let header_value = HeaderValue::from_str(&trace_id.to_string()).ok();
        if let Some(v) = header_value.clone() {
            req.headers_mut().insert(X_TRACE_ID, v);
        }

        let mut response = next.run(req).await;

        if let Some(v) = header_value {
            response.headers_mut().insert(X_TRACE_ID, v);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );

        response
    }
    .instrument(span)
    .await
}

async fn buffer_and_log(
    headers: &header::HeaderMap,
    body: Body,
    limit: usize,
) -> Result<Bytes, ServerError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_text = content_type.contains("application/json")
        || content_type.contains("application/x-www-form-urlencoded");

    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit, "request body too large");
            return Err(ServerError::PayloadTooLarge { limit });
        }
        Err(e) => return Err(ServerError::BadRequest(format!("unreadable request body: {e}"))),
    };

    if is_text && bytes.len() < MAX_LOGGED_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            info!("request body: {}", text);
        }
    } else if !bytes.is_empty() {
        info!("request body: [skipped: type={}, size={}]", content_type, bytes.len());
    }

    Ok(bytes)
}
