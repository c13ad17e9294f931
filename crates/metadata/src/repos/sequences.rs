//! Sequence repository trait.

use crate::error::MetadataResult;
use crate::models::{RestoredSequence, SequenceRow, SequenceStats, TombstoneRow, WriteTokenRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for sequence rows and their lifecycle transitions.
///
/// Guarded transitions return `false` when the sequence is not `uploading`
/// or `token` is not its live write token; nothing is changed in that case.
#[async_trait]
pub trait SequenceRepo: Send + Sync {
    /// Insert a sequence together with its write token.
    ///
    /// Fails with `AlreadyExists` when the name is taken.
    async fn create_sequence(
        &self,
        sequence: &SequenceRow,
        token: &WriteTokenRow,
    ) -> MetadataResult<()>;

    async fn get_sequence(&self, sequence_id: Uuid) -> MetadataResult<Option<SequenceRow>>;

    async fn get_sequence_by_name(&self, name: &str) -> MetadataResult<Option<SequenceRow>>;

    /// All sequences ordered by name.
    async fn list_sequences(&self) -> MetadataResult<Vec<SequenceRow>>;

    async fn list_sequences_in_state(&self, state: &str) -> MetadataResult<Vec<SequenceRow>>;

    /// Move `uploading -> archived` and drop every token of the sequence and its topics.
    async fn archive_sequence(
        &self,
        sequence_id: Uuid,
        token: Uuid,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Move `uploading -> aborted` and drop every token of the sequence and its topics.
    async fn mark_sequence_aborted(
        &self,
        sequence_id: Uuid,
        token: Uuid,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Remove the sequence, its topics, chunks, skip indices, tokens and notifications,
    /// and record `tombstone` for the object store sweep.
    async fn delete_sequence(
        &self,
        sequence_id: Uuid,
        token: Uuid,
        tombstone: &TombstoneRow,
    ) -> MetadataResult<bool>;

    /// Unconditionally remove all rows of a sequence. Used to purge aborted sequences.
    async fn purge_sequence_rows(&self, sequence_id: Uuid) -> MetadataResult<()>;

    async fn sequence_stats(&self, sequence_id: Uuid) -> MetadataResult<SequenceStats>;

    /// Insert a sequence rebuilt from the object store in one transaction.
    ///
    /// Fails with `AlreadyExists` when the id or name is already catalogued.
    async fn restore_sequence(&self, restored: &RestoredSequence) -> MetadataResult<()>;
}
