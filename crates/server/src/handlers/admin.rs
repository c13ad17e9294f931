//! Health and operator endpoints.

use crate::error::ApiResult;
use crate::gc::{self, GcReport};
use crate::recovery::{self, RecoveryReport};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Checks that both the object store and the catalog answer. Returns only
/// non-sensitive information (status and version).
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.storage.health_check().await?;
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /v1/admin/recover - Rebuild catalog rows from the object store.
#[tracing::instrument(skip(state))]
pub async fn run_recovery(State(state): State<AppState>) -> ApiResult<Json<RecoveryReport>> {
    Ok(Json(recovery::recover(&state).await?))
}

/// POST /v1/admin/gc - Run one GC sweep now.
#[tracing::instrument(skip(state))]
pub async fn run_gc(State(state): State<AppState>) -> ApiResult<Json<GcReport>> {
    Ok(Json(gc::sweep(&state).await?))
}
