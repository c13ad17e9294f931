//! Repository traits for catalog operations.

pub mod chunks;
pub mod notifications;
pub mod sequences;
pub mod tokens;
pub mod tombstones;
pub mod topics;

pub use chunks::ChunkRepo;
pub use notifications::NotificationRepo;
pub use sequences::SequenceRepo;
pub use tokens::TokenRepo;
pub use tombstones::TombstoneRepo;
pub use topics::TopicRepo;
