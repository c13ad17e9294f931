//! Resource identifiers and write tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string.
            pub fn parse(s: &str) -> crate::Result<Self> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| crate::Error::InvalidId(format!(concat!("invalid ", $label, ": {}"), e)))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a Sequence.
    SequenceId,
    "sequence id"
);

uuid_id!(
    /// Unique identifier of a Topic.
    TopicId,
    "topic id"
);

uuid_id!(
    /// Unique identifier of a Chunk.
    ChunkId,
    "chunk id"
);

uuid_id!(
    /// Admission credential returned when a Sequence or Topic is created.
    ///
    /// Exactly one live token exists per mutable resource.
    WriteToken,
    "write token"
);

impl ChunkId {
    /// Deterministic chunk id for a topic's `sequence_index`.
    ///
    /// Recovery recomputes the same id from the object layout alone.
    pub fn derive(topic_id: TopicId, sequence_index: u64) -> Self {
        Self(Uuid::new_v5(
            topic_id.as_uuid(),
            &sequence_index.to_be_bytes(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let id = SequenceId::new();
        let parsed = SequenceId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            TopicId::parse("not-a-uuid"),
            Err(crate::Error::InvalidId(_))
        ));
    }

    #[test]
    fn test_chunk_id_is_deterministic() {
        let topic = TopicId::new();
        assert_eq!(ChunkId::derive(topic, 3), ChunkId::derive(topic, 3));
        assert_ne!(ChunkId::derive(topic, 3), ChunkId::derive(topic, 4));
        assert_ne!(ChunkId::derive(topic, 0), ChunkId::derive(TopicId::new(), 0));
    }

    #[test]
    fn test_serde_is_transparent() {
        let token = WriteToken::new();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{token}\""));
    }
}
