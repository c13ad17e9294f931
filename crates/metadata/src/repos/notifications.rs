//! Notification repository trait.

use crate::error::MetadataResult;
use crate::models::{NewNotification, NotificationRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Append-only diagnostics per resource.
#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn create_notification(
        &self,
        notification: &NewNotification,
    ) -> MetadataResult<NotificationRow>;

    /// Notifications of a resource in creation order.
    async fn list_notifications(&self, resource_id: Uuid) -> MetadataResult<Vec<NotificationRow>>;

    /// Remove every notification of a resource; returns the number removed.
    async fn purge_notifications(&self, resource_id: Uuid) -> MetadataResult<u64>;
}
