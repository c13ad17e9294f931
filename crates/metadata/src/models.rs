//! Database models mapping to the catalog schema.

use crate::error::{MetadataError, MetadataResult};
use sextant_core::{ResourceKind, SequenceState, SerializationFormat, Severity};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Sequences and topics
// =============================================================================

/// Sequence record.
#[derive(Debug, Clone, FromRow)]
pub struct SequenceRow {
    pub sequence_id: Uuid,
    pub name: String,
    pub state: String,
    /// JSON object text.
    pub user_metadata: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SequenceRow {
    pub fn state(&self) -> MetadataResult<SequenceState> {
        self.state
            .parse()
            .map_err(|e: sextant_core::Error| MetadataError::Internal(e.to_string()))
    }
}

/// Topic record. `schema_json` is the serialized schema held by the snapshot at `schema_ref`.
#[derive(Debug, Clone, FromRow)]
pub struct TopicRow {
    pub topic_id: Uuid,
    pub sequence_id: Uuid,
    pub path: String,
    pub ontology_tag: String,
    pub serialization_format: String,
    pub schema_ref: String,
    pub schema_json: String,
    pub user_metadata: String,
    pub created_at: OffsetDateTime,
}

impl TopicRow {
    pub fn serialization_format(&self) -> MetadataResult<SerializationFormat> {
        self.serialization_format
            .parse()
            .map_err(|e: sextant_core::Error| MetadataError::Internal(e.to_string()))
    }
}

// =============================================================================
// Chunks and skip indices
// =============================================================================

/// Immutable chunk record.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub chunk_id: Uuid,
    pub topic_id: Uuid,
    pub sequence_index: i64,
    pub object_key: String,
    pub row_count: i64,
    pub ts_min: i64,
    pub ts_max: i64,
    pub size_bytes: i64,
    /// Hex SHA-256 of the stored payload bytes.
    pub content_hash: String,
    pub created_at: OffsetDateTime,
}

/// Statistics of one field within one chunk; `stats_json` is a serialized `FieldStats`.
#[derive(Debug, Clone, FromRow)]
pub struct SkipIndexRow {
    pub chunk_id: Uuid,
    pub field_path: String,
    pub stats_json: String,
}

/// Chunk row together with its skip index, inserted atomically.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: ChunkRow,
    pub skip_index: Vec<SkipIndexRow>,
}

// =============================================================================
// Write tokens
// =============================================================================

/// Live admission token of a sequence or topic.
#[derive(Debug, Clone, FromRow)]
pub struct WriteTokenRow {
    pub token: Uuid,
    pub resource_id: Uuid,
    pub resource_kind: String,
    pub issued_at: OffsetDateTime,
}

impl WriteTokenRow {
    pub fn issue(resource_id: Uuid, kind: ResourceKind) -> Self {
        Self {
            token: Uuid::new_v4(),
            resource_id,
            resource_kind: kind.as_str().to_string(),
            issued_at: OffsetDateTime::now_utc(),
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Diagnostic message attached to a resource.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub notification_id: i64,
    pub resource_id: Uuid,
    pub resource_kind: String,
    pub severity: String,
    pub message: String,
    pub created_at: OffsetDateTime,
}

/// Notification awaiting insertion; the id is assigned by the catalog.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub resource_id: Uuid,
    pub resource_kind: ResourceKind,
    pub severity: Severity,
    pub message: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Garbage collection
// =============================================================================

/// Object store prefix scheduled for deletion.
#[derive(Debug, Clone, FromRow)]
pub struct TombstoneRow {
    pub tombstone_id: Uuid,
    pub resource_kind: String,
    pub resource_id: Uuid,
    pub prefix: String,
    pub created_at: OffsetDateTime,
}

impl TombstoneRow {
    pub fn new(kind: ResourceKind, resource_id: Uuid, prefix: String) -> Self {
        Self {
            tombstone_id: Uuid::new_v4(),
            resource_kind: kind.as_str().to_string(),
            resource_id,
            prefix,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

// =============================================================================
// Aggregates and recovery
// =============================================================================

/// Aggregate counters over a sequence.
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct SequenceStats {
    pub topic_count: i64,
    pub chunk_count: i64,
    pub total_size_bytes: i64,
}

/// Aggregate counters over a topic.
#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct TopicStats {
    pub chunk_count: i64,
    pub row_count: i64,
    pub total_size_bytes: i64,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
}

/// Everything needed to restore one sequence in a single transaction.
#[derive(Debug, Clone)]
pub struct RestoredSequence {
    pub sequence: SequenceRow,
    pub topics: Vec<TopicRow>,
    pub chunks: Vec<IndexedChunk>,
    pub tokens: Vec<WriteTokenRow>,
}
