//! Tombstone repository trait for deferred object store deletion.

use crate::error::MetadataResult;
use crate::models::TombstoneRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for GC tombstones.
#[async_trait]
pub trait TombstoneRepo: Send + Sync {
    async fn create_tombstone(&self, tombstone: &TombstoneRow) -> MetadataResult<()>;

    /// Oldest tombstones first.
    async fn list_tombstones(&self, limit: u32) -> MetadataResult<Vec<TombstoneRow>>;

    /// Delete a tombstone once its prefix has been removed.
    async fn delete_tombstone(&self, tombstone_id: Uuid) -> MetadataResult<()>;

    /// Whether a tombstone covers `prefix` or one of its parents.
    async fn is_tombstoned(&self, prefix: &str) -> MetadataResult<bool>;
}
