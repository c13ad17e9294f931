//! Write token repository trait.

use crate::error::MetadataResult;
use crate::models::WriteTokenRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for live write tokens.
#[async_trait]
pub trait TokenRepo: Send + Sync {
    /// The live token of a resource, if it has one.
    async fn get_token(&self, resource_id: Uuid) -> MetadataResult<Option<WriteTokenRow>>;

    /// Whether `token` is the live token of `resource_id`.
    async fn verify_token(&self, resource_id: Uuid, token: Uuid) -> MetadataResult<bool>;
}
