//! Streaming ingestion handler.

use crate::error::{ApiError, ApiResult};
use crate::ingest::IngestSummary;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use sextant_core::{Schema, TopicId, WriteToken};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

/// Header carrying the topic write token.
pub const WRITE_TOKEN_HEADER: &str = "x-sextant-write-token";

fn line_error(err: LinesCodecError) -> ApiError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            ApiError::BadRequest("ingest line exceeds the maximum length".to_string())
        }
        LinesCodecError::Io(e) => ApiError::BadRequest(format!("failed to read body: {e}")),
    }
}

/// Ingest an NDJSON stream into one topic.
///
/// The first line is the schema descriptor. Each later line is a record or
/// an array of records. The end of the body closes the write channel.
#[tracing::instrument(skip(state, req), fields(topic_id = %topic_id))]
pub async fn ingest_stream(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
    req: Request,
) -> ApiResult<Json<IngestSummary>> {
    let topic_id = TopicId::parse(&topic_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid topic ID: {e}")))?;
    let token = req
        .headers()
        .get(WRITE_TOKEN_HEADER)
        .ok_or_else(|| ApiError::InvalidToken(format!("missing {WRITE_TOKEN_HEADER} header")))?
        .to_str()
        .ok()
        .and_then(|raw| WriteToken::parse(raw).ok())
        .ok_or_else(|| ApiError::InvalidToken("malformed write token".to_string()))?;

    let mut writer = state.ingestor.open(topic_id, token).await?;

    let body = req
        .into_body()
        .into_data_stream()
        .map_err(std::io::Error::other);
    let codec = LinesCodec::new_with_max_length(state.config.server.max_ingest_line_bytes);
    let mut lines = FramedRead::new(StreamReader::new(body), codec);

    let descriptor = loop {
        match lines.next().await {
            Some(line) => {
                let line = line.map_err(line_error)?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(ApiError::BadRequest("missing schema descriptor".to_string())),
        }
    };
    let descriptor: Schema = serde_json::from_str(&descriptor)
        .map_err(|e| ApiError::BadRequest(format!("invalid schema descriptor: {e}")))?;
    writer.check_descriptor(&descriptor)?;

    while let Some(line) = lines.next().await {
        let line = line.map_err(line_error)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Array(batch)) => {
                writer.push_batch(batch).await?;
            }
            Ok(record) => {
                writer.push_batch(vec![record]).await?;
            }
            Err(e) => writer.reject(format!("invalid JSON: {e}")),
        }
    }

    let summary = writer.close().await?;
    tracing::info!(
        accepted = summary.rows_accepted,
        rejected = summary.rows_rejected,
        chunks = summary.chunks_written,
        "Ingest stream closed"
    );
    Ok(Json(summary))
}
