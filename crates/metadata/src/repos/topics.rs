//! Topic repository trait.

use crate::error::MetadataResult;
use crate::models::{TombstoneRow, TopicRow, TopicStats, WriteTokenRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for topic rows.
#[async_trait]
pub trait TopicRepo: Send + Sync {
    /// Insert a topic and its write token.
    ///
    /// `sequence_token` must be the live token of the parent sequence, which must be
    /// `uploading` (`InvalidStateTransition` otherwise). A taken path is `AlreadyExists`.
    async fn create_topic(
        &self,
        topic: &TopicRow,
        sequence_token: Uuid,
        token: &WriteTokenRow,
    ) -> MetadataResult<()>;

    async fn get_topic(&self, topic_id: Uuid) -> MetadataResult<Option<TopicRow>>;

    async fn get_topic_by_path(
        &self,
        sequence_id: Uuid,
        path: &str,
    ) -> MetadataResult<Option<TopicRow>>;

    /// Topics of a sequence ordered by path.
    async fn list_topics(&self, sequence_id: Uuid) -> MetadataResult<Vec<TopicRow>>;

    /// Remove a topic with its chunks, token and notifications while the parent
    /// sequence is `uploading` and `token` is the topic's live token.
    async fn delete_topic(
        &self,
        topic_id: Uuid,
        token: Uuid,
        tombstone: &TombstoneRow,
    ) -> MetadataResult<bool>;

    async fn topic_stats(&self, topic_id: Uuid) -> MetadataResult<TopicStats>;
}
