//! Core domain types and shared logic for Sextant.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Sequence, topic and chunk identifiers and write tokens
//! - Lifecycle states and naming rules
//! - Ontology schemas and record validation
//! - Chunk skip-index statistics and the query filter language
//! - Object store layout and configuration

pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod layout;
pub mod ontology;
pub mod resource;
pub mod stats;
pub mod timestamp;
pub mod value;

pub use error::{Error, Result};
pub use filter::{Condition, LayerFilter, Predicate, QueryFilter};
pub use ids::{ChunkId, SequenceId, TopicId, WriteToken};
pub use ontology::{FieldKind, FieldSpec, OntologyRegistry, Schema};
pub use resource::{Locator, ResourceKind, SequenceState, SerializationFormat, Severity};
pub use stats::{ChunkStats, FieldStats};
pub use timestamp::{TIMESTAMP_FIELD, Timestamp, TimestampRange};
pub use value::{Number, Scalar};
