//! HTTP request handlers.

pub mod actions;
pub mod admin;
pub mod ingest;
pub mod retrieval;

pub use actions::*;
pub use admin::*;
pub use ingest::*;
pub use retrieval::*;
