//! Metadata catalog for Sextant.
//!
//! The catalog is a cache of the object store: every row here can be rebuilt
//! by rescanning stored manifests, schema snapshots and chunk payloads.
//! It holds:
//! - Sequences and topics with their lifecycle state
//! - Chunk rows and per-chunk skip index statistics
//! - Live write tokens
//! - Notifications and GC tombstones

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use sextant_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
