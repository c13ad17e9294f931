//! Query compiler and pruning executor.
//!
//! Layers narrow each other in order: sequence rows, then topic rows, then
//! chunk skip indices. Pruning is conservative, so a chunk holding a matching
//! row is never dropped. With `query.verify_candidates` the surviving chunks
//! are read back and kept only if one row satisfies every ontology predicate.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::retrieval::load_chunk;
use crate::state::AppState;
use serde::Serialize;
use serde_json::{Value, json};
use sextant_core::{
    Condition, FieldStats, Locator, QueryFilter, Schema, SequenceState, TIMESTAMP_FIELD, TimestampRange,
};
use sextant_metadata::models::{ChunkRow, SequenceRow, TopicRow};
use std::collections::{BTreeMap, HashMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub items: Vec<QueryItem>,
}

/// Matching topics of one sequence.
#[derive(Debug, Clone, Serialize)]
pub struct QueryItem {
    pub sequence: String,
    pub topics: Vec<TopicMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicMatch {
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_range: Option<TimestampRange>,
}

fn nanos(at: OffsetDateTime) -> i64 {
    at.unix_timestamp_nanos() as i64
}

fn user_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

/// Fields a sequence filter can address.
fn sequence_view(row: &SequenceRow) -> Value {
    json!({
        "name": row.name,
        "created_at": nanos(row.created_at),
        "state": row.state,
        "user_metadata": user_metadata(&row.user_metadata),
    })
}

/// Fields a topic filter can address.
fn topic_view(sequence: &str, row: &TopicRow) -> Value {
    json!({
        "path": row.path,
        "locator": Locator::topic(sequence, &row.path).to_string(),
        "ontology_tag": row.ontology_tag,
        "serialization_format": row.serialization_format,
        "created_at": nanos(row.created_at),
        "user_metadata": user_metadata(&row.user_metadata),
    })
}

/// Bind ontology conditions to the fields of one topic.
///
/// A path may carry the topic's tag as a prefix (`imu.acceleration.x`).
/// Returns `None` when any condition names a field the topic lacks. Two
/// conditions that bind to the same field are a malformed filter.
pub fn bind_conditions(
    conditions: &[Condition],
    ontology_tag: &str,
    schema: &Schema,
) -> ApiResult<Option<Vec<Condition>>> {
    let known = |path: &str| path == TIMESTAMP_FIELD || schema.field(path).is_some();
    let mut bound = Vec::with_capacity(conditions.len());
    let mut fields = HashSet::with_capacity(conditions.len());
    for condition in conditions {
        let stripped = condition
            .field
            .strip_prefix(ontology_tag)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| known(rest));
        let field = match stripped {
            Some(rest) => rest.to_string(),
            None if known(&condition.field) => condition.field.clone(),
            None => return Ok(None),
        };
        if !fields.insert(field.clone()) {
            return Err(ApiError::MalformedFilter(format!(
                "field '{field}' of '{ontology_tag}' appears more than once"
            )));
        }
        bound.push(Condition {
            field,
            predicate: condition.predicate.clone(),
        });
    }
    Ok(Some(bound))
}

/// Whether a chunk could hold a row matching every bound condition.
pub fn chunk_could_match(conditions: &[Condition], stats: Option<&BTreeMap<String, FieldStats>>) -> bool {
    let Some(stats) = stats else {
        return true;
    };
    conditions
        .iter()
        .all(|c| c.predicate.could_match(stats.get(&c.field)))
}

/// Execute a parsed query against the catalog.
#[tracing::instrument(skip(state, filter), fields(include_range = filter.include_timestamp_range))]
pub async fn execute(state: &AppState, filter: &QueryFilter) -> ApiResult<QueryResponse> {
    let _timer = metrics::QUERY_DURATION.start_timer();
    let ontology = filter.ontology_conditions();
    let narrows_topics = filter.topic.is_some() || !ontology.is_empty();

    let mut response = QueryResponse::default();
    for sequence in state.metadata.list_sequences().await? {
        if sequence.state()? == SequenceState::Aborted {
            continue;
        }
        if let Some(layer) = &filter.sequence
            && !layer.matches(&sequence_view(&sequence))
        {
            continue;
        }

        let mut topics = Vec::new();
        for topic in state.metadata.list_topics(sequence.sequence_id).await? {
            if let Some(layer) = &filter.topic
                && !layer.matches(&topic_view(&sequence.name, &topic))
            {
                continue;
            }
            let locator = Locator::topic(&sequence.name, &topic.path).to_string();

            if ontology.is_empty() {
                let timestamp_range = if filter.include_timestamp_range {
                    let stats = state.metadata.topic_stats(topic.topic_id).await?;
                    stats
                        .ts_min
                        .zip(stats.ts_max)
                        .map(|(start, end)| TimestampRange { start, end })
                } else {
                    None
                };
                topics.push(TopicMatch {
                    locator,
                    timestamp_range,
                });
                continue;
            }

            if let Some(range) = match_topic(state, &topic, ontology).await? {
                topics.push(TopicMatch {
                    locator,
                    timestamp_range: filter.include_timestamp_range.then_some(range),
                });
            }
        }

        if topics.is_empty() && narrows_topics {
            continue;
        }
        response.items.push(QueryItem {
            sequence: sequence.name,
            topics,
        });
    }

    tracing::debug!(sequences = response.items.len(), "Query executed");
    Ok(response)
}

/// Evaluate the ontology layer against one topic.
///
/// Returns the window over the surviving chunks, or `None` when no chunk survives.
async fn match_topic(
    state: &AppState,
    topic: &TopicRow,
    ontology: &[Condition],
) -> ApiResult<Option<TimestampRange>> {
    let schema: Schema = serde_json::from_str(&topic.schema_json).map_err(|e| {
        ApiError::Internal(format!("corrupt schema for topic {}: {e}", topic.topic_id))
    })?;
    let Some(conditions) = bind_conditions(ontology, &topic.ontology_tag, &schema)? else {
        return Ok(None);
    };

    let chunks = state.metadata.list_chunks(topic.topic_id).await?;
    if chunks.is_empty() {
        return Ok(None);
    }
    let stats = load_stats(state, topic.topic_id).await?;

    let mut window: Option<TimestampRange> = None;
    for chunk in &chunks {
        if !chunk_could_match(&conditions, stats.get(&chunk.chunk_id)) {
            metrics::CHUNKS_PRUNED.with_label_values(&["pruned"]).inc();
            continue;
        }
        if state.config.query.verify_candidates && !confirm_chunk(state, chunk, &conditions).await? {
            metrics::CHUNKS_PRUNED.with_label_values(&["unconfirmed"]).inc();
            continue;
        }
        metrics::CHUNKS_PRUNED.with_label_values(&["matched"]).inc();
        let range = TimestampRange {
            start: chunk.ts_min,
            end: chunk.ts_max,
        };
        window = Some(window.map_or(range, |w| w.union(&range)));
    }
    Ok(window)
}

/// Skip index of a topic grouped by chunk. Unreadable entries are left out,
/// which keeps their chunk.
async fn load_stats(
    state: &AppState,
    topic_id: Uuid,
) -> ApiResult<HashMap<Uuid, BTreeMap<String, FieldStats>>> {
    let mut by_chunk: HashMap<Uuid, BTreeMap<String, FieldStats>> = HashMap::new();
    let mut corrupt = Vec::new();
    for row in state.metadata.list_skip_index(topic_id).await? {
        match serde_json::from_str::<FieldStats>(&row.stats_json) {
            Ok(stats) => {
                by_chunk
                    .entry(row.chunk_id)
                    .or_default()
                    .insert(row.field_path, stats);
            }
            Err(e) => {
                tracing::warn!(chunk_id = %row.chunk_id, field = %row.field_path, error = %e, "Unreadable skip index entry");
                corrupt.push(row.chunk_id);
            }
        }
    }
    for chunk_id in corrupt {
        by_chunk.remove(&chunk_id);
    }
    Ok(by_chunk)
}

/// Read a candidate chunk and look for one row satisfying every condition.
async fn confirm_chunk(state: &AppState, chunk: &ChunkRow, conditions: &[Condition]) -> ApiResult<bool> {
    let rows = load_chunk(state.storage.as_ref(), chunk).await?;
    Ok(rows
        .iter()
        .any(|row| conditions.iter().all(|c| c.eval_doc(row))))
}
