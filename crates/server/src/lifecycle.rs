//! Sequence and topic lifecycle.
//!
//! ```text
//! Uploading ──finalize──▶ Archived
//!     │
//!     └──────abort──────▶ Aborted ──purge──▶ (gone)
//! ```
//!
//! Every transition is a single guarded catalog update keyed on the state and
//! the live write token, so of two racing callers at most one succeeds.
//! Snapshots are written to the object store before the catalog rows that
//! reference them.

use crate::error::{ApiError, ApiResult};
use crate::gc;
use crate::metrics;
use crate::state::AppState;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use sextant_core::layout::{
    FinalizeMarker, SequenceManifest, TopicSnapshot, finalized_key, manifest_key, schema_key,
    sequence_prefix, topic_prefix,
};
use sextant_core::resource::{normalize_topic_path, sanitize_sequence_name};
use sextant_core::{
    Locator, OntologyRegistry, ResourceKind, Schema, SequenceId, SequenceState,
    SerializationFormat, Severity, TimestampRange, TopicId, WriteToken,
};
use sextant_metadata::models::{
    NewNotification, NotificationRow, SequenceRow, TombstoneRow, TopicRow, WriteTokenRow,
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier and write token of a newly created resource.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedResource {
    pub id: Uuid,
    pub write_token: Uuid,
}

/// Parameters of `topic_create`.
#[derive(Debug, Clone)]
pub struct NewTopic {
    pub path: String,
    pub ontology_tag: String,
    pub serialization_format: Option<SerializationFormat>,
    pub user_metadata: Value,
    /// Explicit schema for a tag outside the registry.
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceSummary {
    pub sequence_id: Uuid,
    pub name: String,
    pub state: SequenceState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceSystemInfo {
    pub sequence_id: Uuid,
    pub name: String,
    pub state: SequenceState,
    pub is_locked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_metadata: Value,
    pub topic_count: u64,
    pub chunk_count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicSystemInfo {
    pub topic_id: Uuid,
    pub locator: String,
    pub ontology_tag: String,
    pub serialization_format: SerializationFormat,
    pub is_locked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user_metadata: Value,
    pub chunk_count: u64,
    pub row_count: u64,
    pub total_size_bytes: u64,
    pub timestamp_range: Option<TimestampRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub resource_id: Uuid,
    pub resource_kind: String,
    pub severity: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<NotificationRow> for NotificationView {
    fn from(row: NotificationRow) -> Self {
        Self {
            resource_id: row.resource_id,
            resource_kind: row.resource_kind,
            severity: row.severity,
            message: row.message,
            created_at: row.created_at,
        }
    }
}

fn metadata_object(value: Value) -> ApiResult<Value> {
    match value {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(value),
        other => Err(ApiError::BadRequest(format!(
            "user_metadata must be an object, got {other}"
        ))),
    }
}

fn parse_user_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn snapshot_bytes<T: Serialize>(value: &T) -> ApiResult<Bytes> {
    serde_json::to_vec_pretty(value)
        .map(Bytes::from)
        .map_err(|e| ApiError::Internal(format!("failed to encode snapshot: {e}")))
}

async fn load_sequence(state: &AppState, sequence_id: Uuid) -> ApiResult<SequenceRow> {
    state
        .metadata
        .get_sequence(sequence_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sequence {sequence_id}")))
}

async fn load_topic(state: &AppState, topic_id: Uuid) -> ApiResult<TopicRow> {
    state
        .metadata
        .get_topic(topic_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("topic {topic_id}")))
}

fn ensure_mutable(sequence: &SequenceRow) -> ApiResult<()> {
    let state = sequence.state()?;
    if state.is_mutable() {
        Ok(())
    } else {
        Err(ApiError::ResourceLocked(format!(
            "sequence '{}' is {state}",
            sequence.name
        )))
    }
}

/// Check a sequence mutation: unknown id, then state, then token.
async fn guard_sequence(
    state: &AppState,
    sequence_id: Uuid,
    token: WriteToken,
) -> ApiResult<SequenceRow> {
    let sequence = load_sequence(state, sequence_id).await?;
    ensure_mutable(&sequence)?;
    if !state
        .metadata
        .verify_token(sequence_id, *token.as_uuid())
        .await?
    {
        return Err(ApiError::InvalidToken(format!("sequence {sequence_id}")));
    }
    Ok(sequence)
}

/// Explain why a guarded transition matched no row.
async fn transition_error(state: &AppState, sequence_id: Uuid) -> ApiError {
    match load_sequence(state, sequence_id).await {
        Ok(sequence) => match ensure_mutable(&sequence) {
            Ok(()) => ApiError::InvalidToken(format!("sequence {sequence_id}")),
            Err(e) => e,
        },
        Err(e) => e,
    }
}

// =============================================================================
// Sequences
// =============================================================================

#[tracing::instrument(skip(state, user_metadata))]
pub async fn create_sequence(
    state: &AppState,
    name: &str,
    user_metadata: Value,
) -> ApiResult<CreatedResource> {
    let name = sanitize_sequence_name(name)?;
    let user_metadata = metadata_object(user_metadata)?;
    let now = OffsetDateTime::now_utc();
    let sequence_id = SequenceId::new();

    let manifest = SequenceManifest {
        id: sequence_id,
        name: name.clone(),
        created_at: now,
        user_metadata: user_metadata.clone(),
    };
    let key = manifest_key(sequence_id);
    state.storage.put(&key, snapshot_bytes(&manifest)?).await?;

    let row = SequenceRow {
        sequence_id: *sequence_id.as_uuid(),
        name: name.clone(),
        state: SequenceState::Uploading.as_str().to_string(),
        user_metadata: user_metadata.to_string(),
        created_at: now,
        updated_at: now,
    };
    let token = WriteTokenRow::issue(row.sequence_id, ResourceKind::Sequence);
    if let Err(err) = state.metadata.create_sequence(&row, &token).await {
        if let Err(e) = state.storage.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove unclaimed manifest");
        }
        return Err(ApiError::from_lifecycle(err));
    }

    metrics::SEQUENCES_CREATED.inc();
    tracing::info!(sequence_id = %sequence_id, name = %name, "Sequence created");
    Ok(CreatedResource {
        id: row.sequence_id,
        write_token: token.token,
    })
}

/// Flush every topic buffer and archive the sequence.
#[tracing::instrument(skip(state, token))]
pub async fn finalize_sequence(
    state: &AppState,
    sequence_id: Uuid,
    token: WriteToken,
) -> ApiResult<()> {
    let sequence = guard_sequence(state, sequence_id, token).await?;
    let topics = state.metadata.list_topics(sequence_id).await?;

    let mut lanes = state.ingestor.try_acquire(&topics)?;
    for lane in &mut lanes {
        let buffered = lane.buffered_rows();
        if let Some(chunk) = state.ingestor.flush(lane).await? {
            tracing::debug!(
                topic = %lane.ctx.path,
                rows = buffered,
                index = chunk.sequence_index,
                "Flushed partial buffer"
            );
        }
    }

    let id = SequenceId::from(sequence_id);
    let now = OffsetDateTime::now_utc();
    let marker_key = finalized_key(id);
    let marker = FinalizeMarker {
        sequence_id: id,
        finalized_at: now,
    };
    state
        .storage
        .put(&marker_key, snapshot_bytes(&marker)?)
        .await?;

    if !state
        .metadata
        .archive_sequence(sequence_id, *token.as_uuid(), now)
        .await?
    {
        if let Err(e) = state.storage.delete(&marker_key).await {
            tracing::warn!(key = %marker_key, error = %e, "Failed to remove archive marker");
        }
        return Err(transition_error(state, sequence_id).await);
    }
    drop(lanes);
    state.ingestor.discard(topics.iter().map(|t| t.topic_id));

    metrics::SEQUENCES_FINALIZED.inc();
    tracing::info!(name = %sequence.name, topics = topics.len(), "Sequence archived");
    Ok(())
}

/// Abort an uploading sequence and purge everything written for it.
#[tracing::instrument(skip(state, token))]
pub async fn abort_sequence(
    state: &AppState,
    sequence_id: Uuid,
    token: WriteToken,
) -> ApiResult<()> {
    let sequence = guard_sequence(state, sequence_id, token).await?;
    if !state
        .metadata
        .mark_sequence_aborted(sequence_id, *token.as_uuid(), OffsetDateTime::now_utc())
        .await?
    {
        return Err(transition_error(state, sequence_id).await);
    }
    metrics::SEQUENCES_ABORTED.inc();

    purge_sequence(state, sequence_id).await?;
    tracing::info!(name = %sequence.name, "Sequence aborted and purged");
    Ok(())
}

/// Remove buffers, objects and rows of an aborted sequence.
async fn purge_sequence(state: &AppState, sequence_id: Uuid) -> ApiResult<()> {
    let topics = state.metadata.list_topics(sequence_id).await?;
    state.ingestor.discard(topics.iter().map(|t| t.topic_id));

    let prefix = sequence_prefix(sequence_id.into());
    let deleted = state.storage.delete_prefix(&prefix).await?;
    state.metadata.purge_sequence_rows(sequence_id).await?;
    tracing::debug!(prefix = %prefix, objects = deleted, "Sequence purged");
    Ok(())
}

/// Purge sequences left in `Aborted` by an interrupted abort.
pub async fn purge_aborted(state: &AppState) -> ApiResult<u64> {
    let stuck = state
        .metadata
        .list_sequences_in_state(SequenceState::Aborted.as_str())
        .await?;
    let mut purged = 0;
    for sequence in stuck {
        match purge_sequence(state, sequence.sequence_id).await {
            Ok(()) => purged += 1,
            Err(e) => tracing::warn!(
                sequence_id = %sequence.sequence_id,
                error = %e,
                "Failed to purge aborted sequence"
            ),
        }
    }
    Ok(purged)
}

/// Delete an uploading sequence; its objects are removed by GC.
#[tracing::instrument(skip(state, token))]
pub async fn delete_sequence(
    state: &AppState,
    sequence_id: Uuid,
    token: WriteToken,
) -> ApiResult<()> {
    let sequence = guard_sequence(state, sequence_id, token).await?;
    let topics = state.metadata.list_topics(sequence_id).await?;
    let lanes = state.ingestor.try_acquire(&topics)?;

    let tombstone = TombstoneRow::new(
        ResourceKind::Sequence,
        sequence_id,
        sequence_prefix(sequence_id.into()),
    );
    if !state
        .metadata
        .delete_sequence(sequence_id, *token.as_uuid(), &tombstone)
        .await?
    {
        return Err(transition_error(state, sequence_id).await);
    }
    state.ingestor.discard(topics.iter().map(|t| t.topic_id));
    drop(lanes);

    tracing::info!(name = %sequence.name, "Sequence deleted");
    gc::spawn_sweep(state.clone());
    Ok(())
}

pub async fn sequence_list(state: &AppState) -> ApiResult<Vec<SequenceSummary>> {
    state
        .metadata
        .list_sequences()
        .await?
        .into_iter()
        .map(|row| -> ApiResult<SequenceSummary> {
            Ok(SequenceSummary {
                state: row.state()?,
                sequence_id: row.sequence_id,
                name: row.name,
                created_at: row.created_at,
            })
        })
        .collect()
}

pub async fn sequence_system_info(
    state: &AppState,
    sequence_id: Uuid,
) -> ApiResult<SequenceSystemInfo> {
    let row = load_sequence(state, sequence_id).await?;
    let stats = state.metadata.sequence_stats(sequence_id).await?;
    let seq_state = row.state()?;
    Ok(SequenceSystemInfo {
        sequence_id,
        user_metadata: parse_user_metadata(&row.user_metadata),
        name: row.name,
        state: seq_state,
        is_locked: !seq_state.is_mutable(),
        created_at: row.created_at,
        topic_count: stats.topic_count.max(0) as u64,
        chunk_count: stats.chunk_count.max(0) as u64,
        total_size_bytes: stats.total_size_bytes.max(0) as u64,
    })
}

// =============================================================================
// Topics
// =============================================================================

/// Resolve the schema and default format of a new topic.
fn topic_schema(topic: &NewTopic) -> ApiResult<(Schema, SerializationFormat)> {
    match OntologyRegistry::builtin().get(&topic.ontology_tag) {
        Some(entry) => {
            if let Some(schema) = &topic.schema
                && schema != &entry.schema
            {
                return Err(ApiError::SchemaMismatch(format!(
                    "schema differs from the registered '{}' ontology",
                    topic.ontology_tag
                )));
            }
            Ok((entry.schema.clone(), entry.format))
        }
        None => match &topic.schema {
            Some(schema) => {
                schema.check()?;
                Ok((schema.clone(), SerializationFormat::Default))
            }
            None => Err(ApiError::BadRequest(format!(
                "unknown ontology tag '{}' and no schema given",
                topic.ontology_tag
            ))),
        },
    }
}

#[tracing::instrument(skip(state, token, topic), fields(path = %topic.path, tag = %topic.ontology_tag))]
pub async fn create_topic(
    state: &AppState,
    sequence_id: Uuid,
    token: WriteToken,
    topic: NewTopic,
) -> ApiResult<CreatedResource> {
    let sequence = guard_sequence(state, sequence_id, token).await?;
    let path = normalize_topic_path(&sequence.name, &topic.path)?;
    if topic.ontology_tag.trim().is_empty() {
        return Err(ApiError::BadRequest("ontology_tag is empty".to_string()));
    }
    let (schema, default_format) = topic_schema(&topic)?;
    let format = topic.serialization_format.unwrap_or(default_format);
    let user_metadata = metadata_object(topic.user_metadata)?;

    let topic_id = TopicId::new();
    let now = OffsetDateTime::now_utc();
    let snapshot = TopicSnapshot {
        id: topic_id,
        sequence_id: sequence_id.into(),
        path: path.clone(),
        ontology_tag: topic.ontology_tag.clone(),
        serialization_format: format,
        user_metadata: user_metadata.clone(),
        created_at: now,
        schema,
    };
    let key = schema_key(sequence_id.into(), topic_id);
    state.storage.put(&key, snapshot_bytes(&snapshot)?).await?;

    let schema_json = serde_json::to_string(&snapshot.schema)
        .map_err(|e| ApiError::Internal(format!("failed to encode schema: {e}")))?;
    let row = TopicRow {
        topic_id: *topic_id.as_uuid(),
        sequence_id,
        path: path.clone(),
        ontology_tag: topic.ontology_tag,
        serialization_format: format.as_str().to_string(),
        schema_ref: key.clone(),
        schema_json,
        user_metadata: user_metadata.to_string(),
        created_at: now,
    };
    let topic_token = WriteTokenRow::issue(row.topic_id, ResourceKind::Topic);
    if let Err(err) = state
        .metadata
        .create_topic(&row, *token.as_uuid(), &topic_token)
        .await
    {
        if let Err(e) = state.storage.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove unclaimed schema snapshot");
        }
        return Err(ApiError::from_lifecycle(err));
    }

    tracing::info!(topic_id = %topic_id, locator = %Locator::topic(&sequence.name, &path), "Topic created");
    Ok(CreatedResource {
        id: row.topic_id,
        write_token: topic_token.token,
    })
}

#[tracing::instrument(skip(state, token))]
pub async fn delete_topic(state: &AppState, topic_id: Uuid, token: WriteToken) -> ApiResult<()> {
    let topic = load_topic(state, topic_id).await?;
    let sequence = load_sequence(state, topic.sequence_id).await?;
    ensure_mutable(&sequence)?;
    if !state
        .metadata
        .verify_token(topic_id, *token.as_uuid())
        .await?
    {
        return Err(ApiError::InvalidToken(format!("topic {topic_id}")));
    }
    let lanes = state.ingestor.try_acquire(std::slice::from_ref(&topic))?;

    let tombstone = TombstoneRow::new(
        ResourceKind::Topic,
        topic_id,
        topic_prefix(topic.sequence_id.into(), topic_id.into()),
    );
    if !state
        .metadata
        .delete_topic(topic_id, *token.as_uuid(), &tombstone)
        .await?
    {
        let sequence = load_sequence(state, topic.sequence_id).await?;
        ensure_mutable(&sequence)?;
        return Err(ApiError::InvalidToken(format!("topic {topic_id}")));
    }
    state.ingestor.discard([topic_id]);
    drop(lanes);

    tracing::info!(path = %topic.path, "Topic deleted");
    gc::spawn_sweep(state.clone());
    Ok(())
}

pub async fn topic_system_info(state: &AppState, topic_id: Uuid) -> ApiResult<TopicSystemInfo> {
    let topic = load_topic(state, topic_id).await?;
    let sequence = load_sequence(state, topic.sequence_id).await?;
    let stats = state.metadata.topic_stats(topic_id).await?;
    let timestamp_range = match (stats.ts_min, stats.ts_max) {
        (Some(start), Some(end)) => Some(TimestampRange { start, end }),
        _ => None,
    };
    Ok(TopicSystemInfo {
        topic_id,
        locator: Locator::topic(&sequence.name, &topic.path).to_string(),
        serialization_format: topic.serialization_format()?,
        is_locked: !sequence.state()?.is_mutable(),
        user_metadata: parse_user_metadata(&topic.user_metadata),
        ontology_tag: topic.ontology_tag,
        created_at: topic.created_at,
        chunk_count: stats.chunk_count.max(0) as u64,
        row_count: stats.row_count.max(0) as u64,
        total_size_bytes: stats.total_size_bytes.max(0) as u64,
        timestamp_range,
    })
}

// =============================================================================
// Notifications
// =============================================================================

async fn ensure_resource(state: &AppState, kind: ResourceKind, resource_id: Uuid) -> ApiResult<()> {
    match kind {
        ResourceKind::Sequence => load_sequence(state, resource_id).await.map(|_| ()),
        ResourceKind::Topic => load_topic(state, resource_id).await.map(|_| ()),
    }
}

pub async fn notify_create(
    state: &AppState,
    kind: ResourceKind,
    resource_id: Uuid,
    severity: Severity,
    message: String,
) -> ApiResult<NotificationView> {
    ensure_resource(state, kind, resource_id).await?;
    let row = state
        .metadata
        .create_notification(&NewNotification {
            resource_id,
            resource_kind: kind,
            severity,
            message,
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;
    tracing::debug!(resource_id = %resource_id, kind = %kind, severity = severity.as_str(), "Notification recorded");
    Ok(row.into())
}

pub async fn notify_list(
    state: &AppState,
    kind: ResourceKind,
    resource_id: Uuid,
) -> ApiResult<Vec<NotificationView>> {
    ensure_resource(state, kind, resource_id).await?;
    Ok(state
        .metadata
        .list_notifications(resource_id)
        .await?
        .into_iter()
        .map(NotificationView::from)
        .collect())
}

pub async fn notify_purge(
    state: &AppState,
    kind: ResourceKind,
    resource_id: Uuid,
) -> ApiResult<u64> {
    ensure_resource(state, kind, resource_id).await?;
    Ok(state.metadata.purge_notifications(resource_id).await?)
}
