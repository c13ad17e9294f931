//! Retrieval handlers.

use crate::error::{ApiError, ApiResult};
use crate::retrieval::{self, ResolvedTopic};
use crate::state::AppState;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sextant_core::Timestamp;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub locator: String,
    #[serde(default)]
    pub start_ns: Option<Timestamp>,
    #[serde(default)]
    pub end_ns: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub topics: Vec<ResolvedTopic>,
}

/// Resolve a locator into retrieval tickets.
#[tracing::instrument(skip(state, body))]
pub async fn resolve(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<ResolveResponse>> {
    let req: ResolveRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    let topics = retrieval::resolve(&state, &req.locator, req.start_ns, req.end_ns).await?;
    Ok(Json(ResolveResponse { topics }))
}

/// Stream the rows behind a ticket as NDJSON.
#[tracing::instrument(skip(state, handle))]
pub async fn stream(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> ApiResult<Response> {
    let rows = retrieval::consume(&state, &handle).await?;
    let body = Body::from_stream(rows.map(|result| {
        result.map_err(|e| {
            tracing::error!(error = %e, "Row stream failed mid-transfer");
            std::io::Error::other(e.to_string())
        })
    }));
    Ok((StatusCode::OK, [(CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}
