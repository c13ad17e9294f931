//! Application state shared across handlers.

use crate::ingest::Ingestor;
use sextant_core::config::AppConfig;
use sextant_metadata::MetadataStore;
use sextant_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata catalog.
    pub metadata: Arc<dyn MetadataStore>,
    /// Per-topic ingestion buffers.
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(
            storage.clone(),
            metadata.clone(),
            config.ingest.clone(),
        ));
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            ingestor,
        }
    }
}
