//! HTTP route handlers and router configuration

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tabstream_core::{spawn, DownloadError, StreamPipeline};

use crate::error::ApiError;
use crate::{download_headers, SERVICE_NAME};

/// Build the application router
pub fn build_router(pipeline: Arc<StreamPipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Any depth: nested and traversal paths must reach validation
        .route("/*path", get(download))
        .with_state(pipeline)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// `GET /{dataset}.{extension}?organisation-entity=...`, and any other path
/// (rejected as an invalid request).
///
/// Validation, the existence check and the reader open all happen before the
/// status line, so every failure up to that point is a JSON error. After it,
/// a failure aborts the body.
async fn download(
    State(pipeline): State<Arc<StreamPipeline>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let request = pipeline.parse_request(&path, query.as_deref().unwrap_or(""))?;
    log::info!(
        "Download: dataset={}, format={}, filter={}",
        request.dataset,
        request.format,
        request.filter_value().unwrap_or("-")
    );
    let headers = download_headers(&request);

    let prepared = pipeline.prepare(request).await?;
    let rx = spawn(prepared).await?;

    // Receiver → body stream; an `Err` item aborts the response mid-body
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    });

    let mut response = Response::builder().status(StatusCode::OK);
    for (name, value) in headers {
        response = response.header(name, value);
    }
    response
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(DownloadError::backend(format!("response build: {e}"))))
}
