//! Chunk and skip index repository trait.

use crate::error::MetadataResult;
use crate::models::{ChunkRow, IndexedChunk, SkipIndexRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for immutable chunk rows and their statistics.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Insert a chunk and its skip index in one transaction.
    ///
    /// The owning sequence must be `uploading` (`InvalidStateTransition` otherwise) and
    /// `sequence_index` must equal the topic's current chunk count (`Constraint`).
    async fn insert_chunk(&self, chunk: &IndexedChunk) -> MetadataResult<()>;

    /// Chunks of a topic in `sequence_index` order.
    async fn list_chunks(&self, topic_id: Uuid) -> MetadataResult<Vec<ChunkRow>>;

    /// Chunks whose `[ts_min, ts_max]` intersects `[start, end]`, in index order.
    async fn list_chunks_in_range(
        &self,
        topic_id: Uuid,
        start: i64,
        end: i64,
    ) -> MetadataResult<Vec<ChunkRow>>;

    async fn count_chunks(&self, topic_id: Uuid) -> MetadataResult<u64>;

    /// Skip index rows of every chunk of a topic.
    async fn list_skip_index(&self, topic_id: Uuid) -> MetadataResult<Vec<SkipIndexRow>>;
}
