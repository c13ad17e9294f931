//! Object store key layout and the immutable snapshots stored there.
//!
//! ```text
//! sequences/{sequence_id}/manifest.json
//! sequences/{sequence_id}/finalized.json
//! sequences/{sequence_id}/topics/{topic_id}/schema.json
//! sequences/{sequence_id}/topics/{topic_id}/chunks/{index:08}.ndjson[.zst|.xz]
//! ```
//!
//! Keys are rooted at ids, never names, so a freed name can be reused while the
//! old prefix is still waiting for garbage collection.

use crate::config::CompressionConfig;
use crate::ids::{SequenceId, TopicId};
use crate::ontology::Schema;
use crate::resource::SerializationFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub const SEQUENCES_ROOT: &str = "sequences/";
const MANIFEST: &str = "manifest.json";
const FINALIZED: &str = "finalized.json";
const SCHEMA: &str = "schema.json";
const CHUNK_SUFFIX: &str = ".ndjson";

pub fn sequence_prefix(sequence: SequenceId) -> String {
    format!("{SEQUENCES_ROOT}{sequence}/")
}

pub fn manifest_key(sequence: SequenceId) -> String {
    format!("{}{MANIFEST}", sequence_prefix(sequence))
}

pub fn finalized_key(sequence: SequenceId) -> String {
    format!("{}{FINALIZED}", sequence_prefix(sequence))
}

pub fn topic_prefix(sequence: SequenceId, topic: TopicId) -> String {
    format!("{}topics/{topic}/", sequence_prefix(sequence))
}

pub fn schema_key(sequence: SequenceId, topic: TopicId) -> String {
    format!("{}{SCHEMA}", topic_prefix(sequence, topic))
}

pub fn chunks_prefix(sequence: SequenceId, topic: TopicId) -> String {
    format!("{}chunks/", topic_prefix(sequence, topic))
}

pub fn chunk_key(
    sequence: SequenceId,
    topic: TopicId,
    sequence_index: u64,
    compression: CompressionConfig,
) -> String {
    format!(
        "{}{sequence_index:08}{CHUNK_SUFFIX}{}",
        chunks_prefix(sequence, topic),
        compression.extension()
    )
}

/// A key recognised by the layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectKey {
    Manifest(SequenceId),
    Finalized(SequenceId),
    Schema(SequenceId, TopicId),
    Chunk {
        sequence: SequenceId,
        topic: TopicId,
        index: u64,
    },
}

impl ObjectKey {
    pub fn sequence(&self) -> SequenceId {
        match self {
            Self::Manifest(s) | Self::Finalized(s) | Self::Schema(s, _) => *s,
            Self::Chunk { sequence, .. } => *sequence,
        }
    }

    /// Classify a key; anything outside the layout yields `None`.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(SEQUENCES_ROOT)?;
        let parts: Vec<&str> = rest.split('/').collect();
        let sequence = SequenceId::parse(parts.first()?).ok()?;
        match parts.as_slice() {
            [_, MANIFEST] => Some(Self::Manifest(sequence)),
            [_, FINALIZED] => Some(Self::Finalized(sequence)),
            [_, "topics", topic, SCHEMA] => Some(Self::Schema(sequence, TopicId::parse(topic).ok()?)),
            [_, "topics", topic, "chunks", file] => {
                let stem = file.split_once(CHUNK_SUFFIX)?.0;
                if !stem.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // Only the padding `chunk_key` writes; past 8 digits it widens.
                let index: u64 = stem.parse().ok()?;
                if format!("{index:08}") != *stem {
                    return None;
                }
                Some(Self::Chunk {
                    sequence,
                    topic: TopicId::parse(topic).ok()?,
                    index,
                })
            }
            _ => None,
        }
    }
}

/// Snapshot of a sequence written once at creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub id: SequenceId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub user_metadata: Value,
}

/// Archive marker written once at finalize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalizeMarker {
    pub sequence_id: SequenceId,
    #[serde(with = "time::serde::rfc3339")]
    pub finalized_at: OffsetDateTime,
}

/// Schema snapshot of a topic written once at creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub id: TopicId,
    pub sequence_id: SequenceId,
    pub path: String,
    pub ontology_tag: String,
    pub serialization_format: SerializationFormat,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub schema: Schema,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_parse_back() {
        let seq = SequenceId::new();
        let topic = TopicId::new();

        assert_eq!(ObjectKey::parse(&manifest_key(seq)), Some(ObjectKey::Manifest(seq)));
        assert_eq!(ObjectKey::parse(&finalized_key(seq)), Some(ObjectKey::Finalized(seq)));
        assert_eq!(
            ObjectKey::parse(&schema_key(seq, topic)),
            Some(ObjectKey::Schema(seq, topic))
        );
        for codec in [CompressionConfig::None, CompressionConfig::Zstd] {
            assert_eq!(
                ObjectKey::parse(&chunk_key(seq, topic, 12, codec)),
                Some(ObjectKey::Chunk {
                    sequence: seq,
                    topic,
                    index: 12
                })
            );
        }
    }

    #[test]
    fn test_wide_chunk_indices_parse_back() {
        let seq = SequenceId::new();
        let topic = TopicId::new();
        for index in [99_999_999, 100_000_000, 12_345_678_901] {
            let key = chunk_key(seq, topic, index, CompressionConfig::Xz);
            assert_eq!(
                ObjectKey::parse(&key),
                Some(ObjectKey::Chunk {
                    sequence: seq,
                    topic,
                    index
                }),
                "{key}"
            );
        }
        // Extra zero padding is not a key `chunk_key` produces.
        assert_eq!(
            ObjectKey::parse(&format!("{}chunks/000000001.ndjson", topic_prefix(seq, topic))),
            None
        );
    }

    #[test]
    fn test_chunk_keys_sort_by_index() {
        let seq = SequenceId::new();
        let topic = TopicId::new();
        let a = chunk_key(seq, topic, 9, CompressionConfig::None);
        let b = chunk_key(seq, topic, 10, CompressionConfig::None);
        assert!(a < b);
    }

    #[test]
    fn test_foreign_keys_are_ignored() {
        let seq = SequenceId::new();
        assert_eq!(ObjectKey::parse("other/thing"), None);
        assert_eq!(ObjectKey::parse("sequences/not-a-uuid/manifest.json"), None);
        assert_eq!(
            ObjectKey::parse(&format!("{}notes.txt", sequence_prefix(seq))),
            None
        );
        assert_eq!(
            ObjectKey::parse(&format!(
                "{}chunks/12.ndjson",
                topic_prefix(seq, TopicId::new())
            )),
            None
        );
    }
}
