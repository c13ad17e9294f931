//! Retrieval resolver and row streaming.
//!
//! `resolve` turns a locator and an optional time window into one ticket per
//! topic. `consume` redeems a ticket as NDJSON: a header line carrying the
//! schema and topic context, then the selected rows in chunk order.

use crate::compression::{content_hash, decode_rows, encode_line};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, ActiveStreamGuard};
use crate::state::AppState;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sextant_core::config::CompressionConfig;
use sextant_core::{Locator, SequenceState, TIMESTAMP_FIELD, Timestamp, TimestampRange};
use sextant_metadata::models::{ChunkRow, SequenceRow, TopicRow};
use sextant_storage::ObjectStore;
use std::pin::Pin;
use uuid::Uuid;

/// A stream of NDJSON bytes.
pub type RowStream = Pin<Box<dyn Stream<Item = ApiResult<Bytes>> + Send>>;

/// Opaque ticket naming one topic and a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
    pub topic_id: Uuid,
    #[serde(default)]
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
}

impl StreamHandle {
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> ApiResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| ApiError::BadRequest("invalid stream handle".to_string()))?;
        serde_json::from_slice(&json)
            .map_err(|_| ApiError::BadRequest("invalid stream handle".to_string()))
    }

    pub fn range(&self) -> ApiResult<TimestampRange> {
        Ok(TimestampRange::from_bounds(self.start, self.end)?)
    }
}

/// A chunk selected by a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRef {
    pub sequence_index: u64,
    pub timestamp_range: TimestampRange,
    pub row_count: u64,
}

/// One addressable retrieval unit.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTopic {
    pub locator: String,
    pub endpoint: String,
    pub handle: String,
    pub chunks: Vec<ChunkRef>,
}

/// Read a chunk payload, check its hash and decode its rows.
pub async fn load_chunk(storage: &dyn ObjectStore, chunk: &ChunkRow) -> ApiResult<Vec<Value>> {
    let data = storage.get(&chunk.object_key).await?;
    let actual = content_hash(&data);
    if actual != chunk.content_hash {
        metrics::CHUNK_HASH_MISMATCHES.inc();
        tracing::error!(
            key = %chunk.object_key,
            expected = %chunk.content_hash,
            actual = %actual,
            "Chunk payload hash mismatch"
        );
        return Err(ApiError::Internal(format!(
            "chunk {} failed its integrity check",
            chunk.object_key
        )));
    }
    decode_rows(&data, CompressionConfig::from_key(&chunk.object_key))
        .await
        .map_err(|e| ApiError::Internal(format!("undecodable chunk {}: {e}", chunk.object_key)))
}

/// Look up a live sequence by name. Aborted sequences are being purged and
/// are not addressable.
async fn live_sequence(state: &AppState, name: &str) -> ApiResult<SequenceRow> {
    let sequence = state
        .metadata
        .get_sequence_by_name(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sequence '{name}'")))?;
    if sequence.state()? == SequenceState::Aborted {
        return Err(ApiError::NotFound(format!("sequence '{name}'")));
    }
    Ok(sequence)
}

/// Resolve a locator into one ticket per topic.
#[tracing::instrument(skip(state))]
pub async fn resolve(
    state: &AppState,
    locator: &str,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
) -> ApiResult<Vec<ResolvedTopic>> {
    let locator = Locator::parse(locator)?;
    let range = TimestampRange::from_bounds(start, end)?;
    let sequence = live_sequence(state, &locator.sequence).await?;

    let topics = match &locator.topic {
        Some(path) => {
            let topic = state
                .metadata
                .get_topic_by_path(sequence.sequence_id, path)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("topic '{locator}'")))?;
            vec![topic]
        }
        None => state.metadata.list_topics(sequence.sequence_id).await?,
    };

    let mut resolved = Vec::with_capacity(topics.len());
    for topic in topics {
        let chunks = state
            .metadata
            .list_chunks_in_range(topic.topic_id, range.start, range.end)
            .await?;
        let handle = StreamHandle {
            topic_id: topic.topic_id,
            start,
            end,
        };
        resolved.push(ResolvedTopic {
            locator: Locator::topic(&sequence.name, &topic.path).to_string(),
            endpoint: state.config.server.public_endpoint.clone(),
            handle: handle.encode(),
            chunks: chunks
                .iter()
                .map(|c| ChunkRef {
                    sequence_index: c.sequence_index as u64,
                    timestamp_range: TimestampRange {
                        start: c.ts_min,
                        end: c.ts_max,
                    },
                    row_count: c.row_count as u64,
                })
                .collect(),
        });
    }

    tracing::debug!(topics = resolved.len(), "Locator resolved");
    Ok(resolved)
}

fn header_line(sequence: &SequenceRow, topic: &TopicRow) -> ApiResult<Bytes> {
    let schema: Value = serde_json::from_str(&topic.schema_json)
        .map_err(|e| ApiError::Internal(format!("corrupt schema for topic {}: {e}", topic.topic_id)))?;
    let user_metadata: Value =
        serde_json::from_str(&topic.user_metadata).unwrap_or_else(|_| json!({}));
    let header = json!({
        "locator": Locator::topic(&sequence.name, &topic.path).to_string(),
        "ontology_tag": topic.ontology_tag,
        "serialization_format": topic.serialization_format,
        "user_metadata": user_metadata,
        "schema": schema,
    });
    encode_line(&header)
        .map(Bytes::from)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn row_in_range(row: &Value, range: &TimestampRange) -> bool {
    row.get(TIMESTAMP_FIELD)
        .and_then(Value::as_i64)
        .is_some_and(|ts| range.contains(ts))
}

/// Encode the rows of one chunk that fall inside `range`.
fn encode_selected(rows: &[Value], chunk: &ChunkRow, range: &TimestampRange) -> ApiResult<Bytes> {
    let whole = range.covers(&TimestampRange {
        start: chunk.ts_min,
        end: chunk.ts_max,
    });
    let mut out = Vec::new();
    for row in rows.iter().filter(|row| whole || row_in_range(row, range)) {
        out.extend(encode_line(row).map_err(|e| ApiError::Internal(e.to_string()))?);
    }
    Ok(Bytes::from(out))
}

/// Redeem a ticket as a stream of NDJSON lines.
///
/// Lookups run before the stream is returned, so an unknown topic fails
/// the request instead of the body.
#[tracing::instrument(skip(state, handle))]
pub async fn consume(state: &AppState, handle: &str) -> ApiResult<RowStream> {
    let handle = StreamHandle::decode(handle)?;
    let range = handle.range()?;
    let topic = state
        .metadata
        .get_topic(handle.topic_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("topic {}", handle.topic_id)))?;
    let sequence = state
        .metadata
        .get_sequence(topic.sequence_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sequence {}", topic.sequence_id)))?;
    if sequence.state()? == SequenceState::Aborted {
        return Err(ApiError::NotFound(format!("sequence '{}'", sequence.name)));
    }

    let header = header_line(&sequence, &topic)?;
    let chunks = state
        .metadata
        .list_chunks_in_range(topic.topic_id, range.start, range.end)
        .await?;
    let storage = state.storage.clone();
    tracing::debug!(topic_id = %topic.topic_id, chunks = chunks.len(), "Streaming topic");

    let stream = async_stream::try_stream! {
        let _guard = ActiveStreamGuard::acquire();
        yield header;
        for chunk in chunks {
            let rows = load_chunk(storage.as_ref(), &chunk).await?;
            let selected = encode_selected(&rows, &chunk, &range)?;
            if !selected.is_empty() {
                yield selected;
            }
        }
    };
    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_url_safe() {
        let handle = StreamHandle {
            topic_id: Uuid::new_v4(),
            start: Some(-5),
            end: None,
        };
        let encoded = handle.encode();
        assert!(
            encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
        assert_eq!(StreamHandle::decode(&encoded).unwrap(), handle);
    }

    #[test]
    fn test_garbage_handle_is_bad_request() {
        let err = StreamHandle::decode("not a handle!").unwrap_err();
        assert_eq!(err.code(), "bad_request");
        let err = StreamHandle::decode(&URL_SAFE_NO_PAD.encode(b"{}")).unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[test]
    fn test_boundary_chunk_is_filtered() {
        let rows: Vec<Value> = (0..10)
            .map(|ts| json!({"timestamp_ns": ts * 10, "value": ts}))
            .collect();
        let chunk = ChunkRow {
            chunk_id: Uuid::new_v4(),
            topic_id: Uuid::new_v4(),
            sequence_index: 0,
            object_key: "k.ndjson".to_string(),
            row_count: 10,
            ts_min: 0,
            ts_max: 90,
            size_bytes: 0,
            content_hash: String::new(),
            created_at: time::OffsetDateTime::now_utc(),
        };

        let inner = TimestampRange::new(25, 55).unwrap();
        let bytes = encode_selected(&rows, &chunk, &inner).unwrap();
        let kept: Vec<Value> = bytes
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect();
        let stamps: Vec<i64> = kept.iter().map(|r| r["timestamp_ns"].as_i64().unwrap()).collect();
        assert_eq!(stamps, [30, 40, 50]);

        let all = encode_selected(&rows, &chunk, &TimestampRange::unbounded()).unwrap();
        assert_eq!(all.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(), 10);
    }
}
