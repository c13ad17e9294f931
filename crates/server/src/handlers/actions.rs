//! Administrative action handlers.
//!
//! Every action is a `POST /v1/actions/{action}` with a JSON body.

use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{self, NewTopic};
use crate::query;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sextant_core::{QueryFilter, ResourceKind, Schema, SerializationFormat, Severity, WriteToken};
use uuid::Uuid;

/// Maximum request body size for action requests (4 MiB).
const MAX_ACTION_BODY_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SequenceCreateRequest {
    pub name: String,
    #[serde(default)]
    pub user_metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct SequenceCreateResponse {
    pub sequence_id: Uuid,
    pub write_token: Uuid,
}

/// Body of `sequence_finalize`, `sequence_abort` and `sequence_delete`.
#[derive(Debug, Deserialize)]
pub struct SequenceTokenRequest {
    pub sequence_id: String,
    #[serde(default)]
    pub write_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopicCreateRequest {
    pub sequence_id: String,
    #[serde(default)]
    pub write_token: Option<String>,
    pub path: String,
    pub ontology_tag: String,
    #[serde(default)]
    pub serialization_format: Option<SerializationFormat>,
    #[serde(default)]
    pub user_metadata: Value,
    /// Required when `ontology_tag` is not a registered tag.
    #[serde(default)]
    pub schema: Option<Schema>,
}

#[derive(Debug, Serialize)]
pub struct TopicCreateResponse {
    pub topic_id: Uuid,
    pub write_token: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TopicTokenRequest {
    pub topic_id: String,
    #[serde(default)]
    pub write_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyCreateRequest {
    pub resource_id: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ResourceRequest {
    pub resource_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SequenceIdRequest {
    pub sequence_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TopicIdRequest {
    pub topic_id: String,
}

/// Acknowledgement of an action with no payload.
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: u64,
}

fn ok() -> Response {
    Json(OkResponse { ok: true }).into_response()
}

fn parse_id(raw: &str, what: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|e| ApiError::BadRequest(format!("invalid {what}: {e}")))
}

/// A missing or malformed token can never match, so it fails like a stale one.
fn parse_token(raw: Option<&str>) -> ApiResult<WriteToken> {
    let raw = raw
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidToken("missing write token".to_string()))?;
    WriteToken::parse(raw).map_err(|_| ApiError::InvalidToken("malformed write token".to_string()))
}

fn parse_body<T: DeserializeOwned>(body: Value) -> ApiResult<T> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(format!("invalid request: {e}")))
}

/// Read the request body as JSON. An empty body reads as `{}`.
async fn read_body(req: Request) -> ApiResult<Value> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ACTION_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn notify_target(action: &str) -> Option<(ResourceKind, &str)> {
    if let Some(op) = action.strip_prefix("sequence_notify_") {
        Some((ResourceKind::Sequence, op))
    } else {
        action
            .strip_prefix("topic_notify_")
            .map(|op| (ResourceKind::Topic, op))
    }
}

/// Dispatch an administrative action.
#[tracing::instrument(skip(state, req))]
pub async fn dispatch_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let body = read_body(req).await?;

    if let Some((kind, op)) = notify_target(&action) {
        return notify(&state, kind, op, body).await;
    }

    match action.as_str() {
        "sequence_create" => {
            let req: SequenceCreateRequest = parse_body(body)?;
            let created = lifecycle::create_sequence(&state, &req.name, req.user_metadata).await?;
            Ok((
                StatusCode::CREATED,
                Json(SequenceCreateResponse {
                    sequence_id: created.id,
                    write_token: created.write_token,
                }),
            )
                .into_response())
        }
        "sequence_finalize" | "sequence_abort" | "sequence_delete" => {
            let req: SequenceTokenRequest = parse_body(body)?;
            let sequence_id = parse_id(&req.sequence_id, "sequence ID")?;
            let token = parse_token(req.write_token.as_deref())?;
            match action.as_str() {
                "sequence_finalize" => lifecycle::finalize_sequence(&state, sequence_id, token).await?,
                "sequence_abort" => lifecycle::abort_sequence(&state, sequence_id, token).await?,
                _ => lifecycle::delete_sequence(&state, sequence_id, token).await?,
            }
            Ok(ok())
        }
        "sequence_list" => Ok(Json(lifecycle::sequence_list(&state).await?).into_response()),
        "sequence_system_info" => {
            let req: SequenceIdRequest = parse_body(body)?;
            let sequence_id = parse_id(&req.sequence_id, "sequence ID")?;
            Ok(Json(lifecycle::sequence_system_info(&state, sequence_id).await?).into_response())
        }
        "topic_create" => {
            let req: TopicCreateRequest = parse_body(body)?;
            let sequence_id = parse_id(&req.sequence_id, "sequence ID")?;
            let token = parse_token(req.write_token.as_deref())?;
            let created = lifecycle::create_topic(
                &state,
                sequence_id,
                token,
                NewTopic {
                    path: req.path,
                    ontology_tag: req.ontology_tag,
                    serialization_format: req.serialization_format,
                    user_metadata: req.user_metadata,
                    schema: req.schema,
                },
            )
            .await?;
            Ok((
                StatusCode::CREATED,
                Json(TopicCreateResponse {
                    topic_id: created.id,
                    write_token: created.write_token,
                }),
            )
                .into_response())
        }
        "topic_delete" => {
            let req: TopicTokenRequest = parse_body(body)?;
            let topic_id = parse_id(&req.topic_id, "topic ID")?;
            let token = parse_token(req.write_token.as_deref())?;
            lifecycle::delete_topic(&state, topic_id, token).await?;
            Ok(ok())
        }
        "topic_system_info" => {
            let req: TopicIdRequest = parse_body(body)?;
            let topic_id = parse_id(&req.topic_id, "topic ID")?;
            Ok(Json(lifecycle::topic_system_info(&state, topic_id).await?).into_response())
        }
        "query" => {
            let filter = QueryFilter::from_json(&body)?;
            Ok(Json(query::execute(&state, &filter).await?).into_response())
        }
        other => Err(ApiError::NotFound(format!("unknown action '{other}'"))),
    }
}

async fn notify(state: &AppState, kind: ResourceKind, op: &str, body: Value) -> ApiResult<Response> {
    match op {
        "create" => {
            let req: NotifyCreateRequest = parse_body(body)?;
            let resource_id = parse_id(&req.resource_id, "resource ID")?;
            let view =
                lifecycle::notify_create(state, kind, resource_id, req.severity, req.message).await?;
            Ok((StatusCode::CREATED, Json(view)).into_response())
        }
        "list" => {
            let req: ResourceRequest = parse_body(body)?;
            let resource_id = parse_id(&req.resource_id, "resource ID")?;
            Ok(Json(lifecycle::notify_list(state, kind, resource_id).await?).into_response())
        }
        "purge" => {
            let req: ResourceRequest = parse_body(body)?;
            let resource_id = parse_id(&req.resource_id, "resource ID")?;
            let purged = lifecycle::notify_purge(state, kind, resource_id).await?;
            Ok(Json(PurgeResponse { purged }).into_response())
        }
        other => Err(ApiError::NotFound(format!("unknown notification action '{other}'"))),
    }
}
