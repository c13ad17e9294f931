//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("unknown ontology tag: {0}")]
    UnknownOntology(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
