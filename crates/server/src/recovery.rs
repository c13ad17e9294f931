//! Catalog rebuilder.
//!
//! Reconstructs sequence, topic, chunk and skip-index rows from the object
//! store alone. Statistics, sizes and hashes are recomputed from the stored
//! payloads. Sequences already in the catalog are left untouched, so running
//! the rebuilder twice restores nothing the second time.

use crate::compression::{EncodedChunk, content_hash, decode_rows};
use crate::error::{ApiError, ApiResult};
use crate::ingest::index_chunk;
use crate::state::AppState;
use serde::Serialize;
use sextant_core::config::CompressionConfig;
use sextant_core::layout::{
    FinalizeMarker, ObjectKey, SEQUENCES_ROOT, SequenceManifest, TopicSnapshot, finalized_key,
    manifest_key, schema_key, sequence_prefix, topic_prefix,
};
use sextant_core::{ChunkStats, ResourceKind, SequenceId, SequenceState, TopicId};
use sextant_metadata::MetadataError;
use sextant_metadata::models::{
    IndexedChunk, RestoredSequence, SequenceRow, TopicRow, WriteTokenRow,
};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// A sequence put back into the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveredSequence {
    pub sequence_id: Uuid,
    pub name: String,
    pub state: SequenceState,
    pub topics: usize,
    pub chunks: usize,
    /// Fresh token of a sequence restored as Uploading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_token: Option<Uuid>,
    /// Fresh topic tokens keyed by topic path.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub topic_tokens: BTreeMap<String, Uuid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub recovered: Vec<RecoveredSequence>,
    pub skipped_existing: Vec<Uuid>,
    /// Names already taken by another sequence in the catalog.
    pub conflicts: Vec<String>,
    /// Keys or prefixes that no restorable record references.
    pub orphans: Vec<String>,
    pub errors: Vec<String>,
}

/// Objects stored under one sequence prefix.
#[derive(Debug, Default)]
struct SequenceObjects {
    manifest: bool,
    finalized: bool,
    schemas: BTreeSet<TopicId>,
    chunks: BTreeMap<TopicId, BTreeMap<u64, String>>,
}

/// Group keys by sequence. Keys outside the layout come back as orphans.
fn group_keys(keys: Vec<String>) -> (BTreeMap<SequenceId, SequenceObjects>, Vec<String>) {
    let mut sequences: BTreeMap<SequenceId, SequenceObjects> = BTreeMap::new();
    let mut orphans = Vec::new();
    for key in keys {
        let Some(parsed) = ObjectKey::parse(&key) else {
            orphans.push(key);
            continue;
        };
        let objects = sequences.entry(parsed.sequence()).or_default();
        match parsed {
            ObjectKey::Manifest(_) => objects.manifest = true,
            ObjectKey::Finalized(_) => objects.finalized = true,
            ObjectKey::Schema(_, topic) => {
                objects.schemas.insert(topic);
            }
            ObjectKey::Chunk { topic, index, .. } => {
                objects.chunks.entry(topic).or_default().insert(index, key);
            }
        }
    }
    (sequences, orphans)
}

async fn read_json<T: serde::de::DeserializeOwned>(state: &AppState, key: &str) -> ApiResult<T> {
    let data = state.storage.get(key).await?;
    serde_json::from_slice(&data).map_err(|e| ApiError::Internal(format!("unreadable {key}: {e}")))
}

/// Rebuild catalog rows for every sequence the catalog does not know.
#[tracing::instrument(skip(state))]
pub async fn recover(state: &AppState) -> ApiResult<RecoveryReport> {
    let keys = state.storage.list(SEQUENCES_ROOT).await?;
    let (sequences, orphans) = group_keys(keys);
    let mut report = RecoveryReport {
        orphans,
        ..Default::default()
    };

    for (sequence_id, objects) in sequences {
        let prefix = sequence_prefix(sequence_id);
        if state.metadata.is_tombstoned(&prefix).await? {
            tracing::debug!(prefix = %prefix, "Skipping sequence pending collection");
            continue;
        }
        if state.metadata.get_sequence(*sequence_id.as_uuid()).await?.is_some() {
            report.skipped_existing.push(*sequence_id.as_uuid());
            continue;
        }
        if !objects.manifest {
            report.orphans.push(prefix);
            continue;
        }
        match restore_sequence(state, sequence_id, objects, &mut report).await {
            Ok(Some(recovered)) => {
                tracing::info!(
                    sequence_id = %sequence_id,
                    name = %recovered.name,
                    topics = recovered.topics,
                    chunks = recovered.chunks,
                    "Sequence recovered"
                );
                report.recovered.push(recovered);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(sequence_id = %sequence_id, error = %e, "Failed to recover sequence");
                report.errors.push(format!("sequence {sequence_id}: {e}"));
            }
        }
    }

    tracing::info!(
        recovered = report.recovered.len(),
        skipped = report.skipped_existing.len(),
        conflicts = report.conflicts.len(),
        orphans = report.orphans.len(),
        errors = report.errors.len(),
        "Recovery finished"
    );
    Ok(report)
}

async fn restore_sequence(
    state: &AppState,
    sequence_id: SequenceId,
    mut objects: SequenceObjects,
    report: &mut RecoveryReport,
) -> ApiResult<Option<RecoveredSequence>> {
    let manifest: SequenceManifest = read_json(state, &manifest_key(sequence_id)).await?;
    if state
        .metadata
        .get_sequence_by_name(&manifest.name)
        .await?
        .is_some()
    {
        report.conflicts.push(manifest.name);
        return Ok(None);
    }

    let (seq_state, updated_at) = if objects.finalized {
        let marker: FinalizeMarker = read_json(state, &finalized_key(sequence_id)).await?;
        (SequenceState::Archived, marker.finalized_at)
    } else {
        (SequenceState::Uploading, manifest.created_at)
    };
    let sequence = SequenceRow {
        sequence_id: *sequence_id.as_uuid(),
        name: manifest.name.clone(),
        state: seq_state.as_str().to_string(),
        user_metadata: manifest.user_metadata.to_string(),
        created_at: manifest.created_at,
        updated_at,
    };

    let mut topics = Vec::new();
    let mut chunks = Vec::new();
    for topic_id in std::mem::take(&mut objects.schemas) {
        let stored = objects.chunks.remove(&topic_id).unwrap_or_default();
        let topic_prefix = topic_prefix(sequence_id, topic_id);
        if state.metadata.is_tombstoned(&topic_prefix).await? {
            continue;
        }
        let key = schema_key(sequence_id, topic_id);
        let snapshot: TopicSnapshot = match read_json(state, &key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.errors.push(format!("topic {topic_id}: {e}"));
                report.orphans.extend(stored.into_values());
                continue;
            }
        };
        let schema_json = serde_json::to_string(&snapshot.schema)
            .map_err(|e| ApiError::Internal(format!("failed to encode schema: {e}")))?;

        let restored = restore_chunks(state, &snapshot, stored, report).await?;
        chunks.extend(restored);
        topics.push(TopicRow {
            topic_id: *topic_id.as_uuid(),
            sequence_id: *sequence_id.as_uuid(),
            path: snapshot.path,
            ontology_tag: snapshot.ontology_tag,
            serialization_format: snapshot.serialization_format.as_str().to_string(),
            schema_ref: key,
            schema_json,
            user_metadata: snapshot.user_metadata.to_string(),
            created_at: snapshot.created_at,
        });
    }
    // Chunks of a topic without a schema snapshot cannot be interpreted.
    for stored in objects.chunks.into_values() {
        report.orphans.extend(stored.into_values());
    }

    let mut tokens = Vec::new();
    let mut write_token = None;
    let mut topic_tokens = BTreeMap::new();
    if seq_state == SequenceState::Uploading {
        let token = WriteTokenRow::issue(sequence.sequence_id, ResourceKind::Sequence);
        write_token = Some(token.token);
        tokens.push(token);
        for topic in &topics {
            let token = WriteTokenRow::issue(topic.topic_id, ResourceKind::Topic);
            topic_tokens.insert(topic.path.clone(), token.token);
            tokens.push(token);
        }
    }

    let recovered = RecoveredSequence {
        sequence_id: sequence.sequence_id,
        name: sequence.name.clone(),
        state: seq_state,
        topics: topics.len(),
        chunks: chunks.len(),
        write_token,
        topic_tokens,
    };
    let restored = RestoredSequence {
        sequence,
        topics,
        chunks,
        tokens,
    };
    match state.metadata.restore_sequence(&restored).await {
        Ok(()) => Ok(Some(recovered)),
        Err(MetadataError::AlreadyExists(_)) => {
            report.conflicts.push(restored.sequence.name);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Rebuild the gap-free run of chunks starting at index 0.
async fn restore_chunks(
    state: &AppState,
    snapshot: &TopicSnapshot,
    mut stored: BTreeMap<u64, String>,
    report: &mut RecoveryReport,
) -> ApiResult<Vec<IndexedChunk>> {
    let mut restored = Vec::new();
    let mut index = 0u64;
    while let Some(key) = stored.remove(&index) {
        let data = state.storage.get(&key).await?;
        let rows = match decode_rows(&data, CompressionConfig::from_key(&key)).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                report.errors.push(format!("{key}: empty chunk"));
                report.orphans.push(key);
                break;
            }
            Err(e) => {
                report.errors.push(format!("{key}: {e}"));
                report.orphans.push(key);
                break;
            }
        };
        if let Some((row, err)) = rows
            .iter()
            .enumerate()
            .find_map(|(i, row)| snapshot.schema.validate(row).err().map(|e| (i, e)))
        {
            report.errors.push(format!("{key}: row {row}: {err}"));
            report.orphans.push(key);
            break;
        }

        let stats = ChunkStats::compute(&snapshot.schema, &rows, state.config.ingest.max_value_set);
        let encoded = EncodedChunk {
            content_hash: content_hash(&data),
            size: data.len() as u64,
            data,
        };
        restored.push(index_chunk(snapshot.id, index, &key, &stats, &encoded)?);
        index += 1;
    }
    report.orphans.extend(stored.into_values());
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sextant_core::layout::chunk_key;

    #[test]
    fn test_group_keys_by_sequence() {
        let seq = SequenceId::new();
        let topic = TopicId::new();
        let keys = vec![
            manifest_key(seq),
            schema_key(seq, topic),
            chunk_key(seq, topic, 1, CompressionConfig::Zstd),
            chunk_key(seq, topic, 0, CompressionConfig::Zstd),
            "sequences/not-a-uuid/manifest.json".to_string(),
        ];
        let (grouped, orphans) = group_keys(keys);
        assert_eq!(orphans, ["sequences/not-a-uuid/manifest.json"]);

        let objects = &grouped[&seq];
        assert!(objects.manifest);
        assert!(!objects.finalized);
        assert!(objects.schemas.contains(&topic));
        let indices: Vec<u64> = objects.chunks[&topic].keys().copied().collect();
        assert_eq!(indices, [0, 1]);
    }
}
