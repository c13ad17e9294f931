//! Sextant server engine and HTTP API.
//!
//! This crate runs the recording catalog:
//! - Sequence and topic lifecycle with write-token admission
//! - Chunked ingestion with skip-index statistics
//! - Three-layer queries with pruning and read-and-confirm verification
//! - Retrieval tickets and NDJSON row streams
//! - Catalog recovery from the object store and prefix GC

pub mod compression;
pub mod error;
pub mod gc;
pub mod handlers;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod query;
pub mod recovery;
pub mod retrieval;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use ingest::{Ingestor, TopicWriter};
pub use routes::create_router;
pub use state::AppState;
