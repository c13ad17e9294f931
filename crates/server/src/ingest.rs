//! Ingestion chunker.
//!
//! Every topic owns one append buffer guarded by a writer lane. A lane is held
//! by at most one [`TopicWriter`] (or by a finalize/delete in progress) and is
//! never waited on: a busy lane is `ResourceLocked`.
//!
//! Closing a chunk writes the payload object first and only then commits the
//! chunk and skip-index rows, so a crash can leave an orphan object but never
//! a catalog row without its payload.

use crate::compression::{EncodedChunk, encode_line, encode_rows};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use sextant_core::config::IngestConfig;
use sextant_core::layout::chunk_key;
use sextant_core::{ChunkId, ChunkStats, Schema, SequenceId, TopicId, WriteToken};
use sextant_metadata::models::{ChunkRow, IndexedChunk, SkipIndexRow, TopicRow};
use sextant_metadata::{MetadataError, MetadataStore};
use sextant_storage::ObjectStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Build the chunk and skip-index rows of a stored payload.
pub fn index_chunk(
    topic_id: TopicId,
    index: u64,
    key: &str,
    stats: &ChunkStats,
    encoded: &EncodedChunk,
) -> ApiResult<IndexedChunk> {
    let range = stats
        .timestamp_range()
        .ok_or_else(|| ApiError::Internal("chunk has no timestamp bounds".to_string()))?;
    let chunk_id = *ChunkId::derive(topic_id, index).as_uuid();
    let skip_index = stats
        .fields
        .iter()
        .map(|(path, field)| {
            Ok(SkipIndexRow {
                chunk_id,
                field_path: path.clone(),
                stats_json: serde_json::to_string(field)?,
            })
        })
        .collect::<serde_json::Result<Vec<_>>>()
        .map_err(|e| ApiError::Internal(format!("failed to encode statistics: {e}")))?;
    let chunk = ChunkRow {
        chunk_id,
        topic_id: *topic_id.as_uuid(),
        sequence_index: index as i64,
        object_key: key.to_string(),
        row_count: stats.row_count as i64,
        ts_min: range.start,
        ts_max: range.end,
        size_bytes: encoded.size as i64,
        content_hash: encoded.content_hash.clone(),
        created_at: OffsetDateTime::now_utc(),
    };
    Ok(IndexedChunk { chunk, skip_index })
}

/// What a writer needs to know about its topic.
#[derive(Debug, Clone)]
pub struct TopicContext {
    pub sequence_id: SequenceId,
    pub topic_id: TopicId,
    pub path: String,
    pub schema: Schema,
}

impl TopicContext {
    pub fn from_row(row: &TopicRow) -> ApiResult<Self> {
        let schema: Schema = serde_json::from_str(&row.schema_json).map_err(|e| {
            ApiError::Internal(format!("corrupt schema for topic {}: {e}", row.topic_id))
        })?;
        Ok(Self {
            sequence_id: row.sequence_id.into(),
            topic_id: row.topic_id.into(),
            path: row.path.clone(),
            schema,
        })
    }
}

/// Rows buffered for a topic but not yet written as a chunk.
#[derive(Debug, Default)]
pub struct TopicBuffer {
    rows: Vec<Value>,
    bytes: u64,
    /// Index of the next chunk; `None` until read from the catalog.
    next_index: Option<u64>,
}

impl TopicBuffer {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A record excluded from the buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub index: u64,
    pub reason: String,
}

/// Outcome of one `push_batch` call. Indices are positions within the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub accepted: u64,
    pub rejected: Vec<Rejection>,
}

/// Outcome of a whole write channel. Indices are positions within the channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub rows_accepted: u64,
    pub rows_rejected: u64,
    pub chunks_written: u64,
    pub rejected: Vec<Rejection>,
}

/// A topic lane held outside of a writer, by finalize or delete.
pub struct HeldLane {
    pub ctx: TopicContext,
    buffer: OwnedMutexGuard<TopicBuffer>,
}

impl HeldLane {
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }
}

/// Per-topic buffers and the chunk-close pipeline.
pub struct Ingestor {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: IngestConfig,
    lanes: DashMap<Uuid, Arc<Mutex<TopicBuffer>>>,
}

impl Ingestor {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
            lanes: DashMap::new(),
        }
    }

    fn lane(&self, topic_id: TopicId) -> Arc<Mutex<TopicBuffer>> {
        self.lanes
            .entry(*topic_id.as_uuid())
            .or_default()
            .value()
            .clone()
    }

    fn try_lock(&self, topic_id: TopicId) -> ApiResult<OwnedMutexGuard<TopicBuffer>> {
        self.lane(topic_id)
            .try_lock_owned()
            .map_err(|_| ApiError::ResourceLocked(format!("topic {topic_id} has an active writer")))
    }

    /// Open the write channel of a topic.
    ///
    /// The lane is taken before the state and token checks, so a finalize that
    /// completes concurrently is always observed.
    #[tracing::instrument(skip(self, topic_id, token), fields(topic_id = %topic_id))]
    pub async fn open(self: &Arc<Self>, topic_id: TopicId, token: WriteToken) -> ApiResult<TopicWriter> {
        let row = self
            .metadata
            .get_topic(*topic_id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("topic {topic_id}")))?;
        let ctx = TopicContext::from_row(&row)?;

        let buffer = self.try_lock(topic_id)?;
        if let Err(e) = self.admit(&row, topic_id, token).await {
            drop(buffer);
            self.release_if_idle(topic_id);
            return Err(e);
        }

        tracing::debug!(path = %ctx.path, buffered = buffer.len(), "Write channel opened");
        Ok(TopicWriter {
            ingestor: self.clone(),
            ctx,
            buffer,
            summary: IngestSummary::default(),
            seen: 0,
        })
    }

    async fn admit(&self, row: &TopicRow, topic_id: TopicId, token: WriteToken) -> ApiResult<()> {
        let sequence = self
            .metadata
            .get_sequence(row.sequence_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("sequence {}", row.sequence_id)))?;
        let state = sequence.state()?;
        if !state.is_mutable() {
            return Err(ApiError::ResourceLocked(format!(
                "sequence '{}' is {state}",
                sequence.name
            )));
        }
        if !self
            .metadata
            .verify_token(*topic_id.as_uuid(), *token.as_uuid())
            .await?
        {
            return Err(ApiError::InvalidToken(format!("topic {topic_id}")));
        }
        Ok(())
    }

    /// Remove a lane nobody holds and that has nothing buffered.
    fn release_if_idle(&self, topic_id: TopicId) {
        self.lanes.remove_if(topic_id.as_uuid(), |_, lane| {
            Arc::strong_count(lane) == 1 && lane.try_lock().is_ok_and(|buffer| buffer.is_empty())
        });
    }

    /// Number of topics with an in-memory lane.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Take the lanes of `topics` without waiting.
    pub fn try_acquire(&self, topics: &[TopicRow]) -> ApiResult<Vec<HeldLane>> {
        topics
            .iter()
            .map(|row| {
                let ctx = TopicContext::from_row(row)?;
                let buffer = self.try_lock(ctx.topic_id)?;
                Ok(HeldLane { ctx, buffer })
            })
            .collect()
    }

    /// Write whatever a held lane has buffered as a final chunk.
    pub async fn flush(&self, lane: &mut HeldLane) -> ApiResult<Option<ChunkRow>> {
        self.close_chunk(&lane.ctx, &mut lane.buffer).await
    }

    /// Drop the buffers of removed topics.
    pub fn discard(&self, topic_ids: impl IntoIterator<Item = Uuid>) {
        for topic_id in topic_ids {
            self.lanes.remove(&topic_id);
        }
    }

    /// Write the buffer as one chunk. On failure the rows stay buffered.
    async fn close_chunk(
        &self,
        ctx: &TopicContext,
        buffer: &mut TopicBuffer,
    ) -> ApiResult<Option<ChunkRow>> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let index = match buffer.next_index {
            Some(index) => index,
            None => self.metadata.count_chunks(*ctx.topic_id.as_uuid()).await?,
        };

        let rows = std::mem::take(&mut buffer.rows);
        let bytes = std::mem::take(&mut buffer.bytes);
        match self.write_chunk(ctx, index, &rows).await {
            Ok(chunk) => {
                buffer.next_index = Some(index + 1);
                Ok(Some(chunk))
            }
            Err(e) => {
                buffer.rows = rows;
                buffer.bytes = bytes;
                buffer.next_index = None;
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip(self, ctx, rows), fields(topic = %ctx.path, rows = rows.len()))]
    async fn write_chunk(&self, ctx: &TopicContext, index: u64, rows: &[Value]) -> ApiResult<ChunkRow> {
        let stats = ChunkStats::compute(&ctx.schema, rows, self.config.max_value_set);
        let encoded = encode_rows(rows, self.config.compression)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to encode chunk: {e}")))?;
        let key = chunk_key(ctx.sequence_id, ctx.topic_id, index, self.config.compression);
        let indexed = index_chunk(ctx.topic_id, index, &key, &stats, &encoded)?;
        self.storage.put(&key, encoded.data.clone()).await?;

        if let Err(err) = self.metadata.insert_chunk(&indexed).await {
            if let Err(e) = self.storage.delete(&key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove uncommitted chunk object");
            }
            return Err(match err {
                MetadataError::InvalidStateTransition { from, .. } => {
                    ApiError::ResourceLocked(format!("sequence is {from}"))
                }
                MetadataError::NotFound(msg) => ApiError::NotFound(msg),
                other => ApiError::Metadata(other),
            });
        }

        metrics::CHUNKS_WRITTEN.inc();
        metrics::BYTES_WRITTEN.inc_by(encoded.size);
        tracing::debug!(
            ts_min = indexed.chunk.ts_min,
            ts_max = indexed.chunk.ts_max,
            size = encoded.size,
            "Chunk committed"
        );
        Ok(indexed.chunk)
    }
}

/// Exclusive write channel of one topic.
///
/// Dropping the writer releases the lane; rows it buffered stay and are
/// written by the next `close` or by finalize.
pub struct TopicWriter {
    ingestor: Arc<Ingestor>,
    ctx: TopicContext,
    buffer: OwnedMutexGuard<TopicBuffer>,
    summary: IngestSummary,
    seen: u64,
}

impl TopicWriter {
    pub fn context(&self) -> &TopicContext {
        &self.ctx
    }

    /// Check the descriptor sent at the start of a channel.
    pub fn check_descriptor(&self, descriptor: &Schema) -> ApiResult<()> {
        if descriptor != &self.ctx.schema {
            return Err(ApiError::SchemaMismatch(format!(
                "descriptor does not match the schema of topic '{}'",
                self.ctx.path
            )));
        }
        Ok(())
    }

    /// Validate and buffer one record, closing a chunk when a threshold is hit.
    pub async fn push(&mut self, record: Value) -> ApiResult<()> {
        let index = self.seen;
        self.seen += 1;
        match self.ctx.schema.validate(&record) {
            Ok(_) => self.accept(record).await,
            Err(e) => {
                self.record_rejection(index, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Buffer every valid record of a batch and report the rest.
    pub async fn push_batch(&mut self, records: Vec<Value>) -> ApiResult<BatchReport> {
        let mut report = BatchReport::default();
        for (i, record) in records.into_iter().enumerate() {
            let index = self.seen;
            self.seen += 1;
            match self.ctx.schema.validate(&record) {
                Ok(_) => {
                    self.accept(record).await?;
                    report.accepted += 1;
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.record_rejection(index, reason.clone());
                    report.rejected.push(Rejection {
                        index: i as u64,
                        reason,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Count a record that never reached validation, such as an unparseable line.
    pub fn reject(&mut self, reason: impl Into<String>) {
        let index = self.seen;
        self.seen += 1;
        self.record_rejection(index, reason.into());
    }

    /// End the flush cycle: write the partial buffer and release the lane.
    pub async fn close(mut self) -> ApiResult<IngestSummary> {
        if self
            .ingestor
            .close_chunk(&self.ctx, &mut self.buffer)
            .await?
            .is_some()
        {
            self.summary.chunks_written += 1;
        }
        tracing::debug!(
            topic = %self.ctx.path,
            accepted = self.summary.rows_accepted,
            rejected = self.summary.rows_rejected,
            chunks = self.summary.chunks_written,
            "Write channel closed"
        );
        Ok(self.summary)
    }

    async fn accept(&mut self, record: Value) -> ApiResult<()> {
        let line = encode_line(&record)
            .map_err(|e| ApiError::Internal(format!("failed to encode record: {e}")))?;
        self.buffer.rows.push(record);
        self.buffer.bytes += line.len() as u64;
        self.summary.rows_accepted += 1;
        metrics::ROWS_INGESTED.inc();

        if self
            .ingestor
            .config
            .should_close(self.buffer.rows.len() as u64, self.buffer.bytes)
            && self
                .ingestor
                .close_chunk(&self.ctx, &mut self.buffer)
                .await?
                .is_some()
        {
            self.summary.chunks_written += 1;
        }
        Ok(())
    }

    fn record_rejection(&mut self, index: u64, reason: String) {
        tracing::debug!(topic = %self.ctx.path, index, reason = %reason, "Record rejected");
        metrics::ROWS_REJECTED.inc();
        self.summary.rows_rejected += 1;
        self.summary.rejected.push(Rejection { index, reason });
    }
}
