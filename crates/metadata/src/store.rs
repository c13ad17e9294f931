//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    ChunkRepo, NotificationRepo, SequenceRepo, TokenRepo, TombstoneRepo, TopicRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    SequenceRepo
    + TopicRepo
    + ChunkRepo
    + TokenRepo
    + NotificationRepo
    + TombstoneRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers, so guarded transactions never interleave.
            .max_connections(1)
            // Bounds how long a statement waits for that connection.
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite catalog ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Drop every row. The schema stays in place.
    pub async fn clear(&self) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "skip_index",
            "chunks",
            "topics",
            "sequences",
            "write_tokens",
            "notifications",
            "gc_tombstones",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const UPLOADING: &str = "uploading";

    async fn insert_token(conn: &mut SqliteConnection, token: &WriteTokenRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO write_tokens (token, resource_id, resource_kind, issued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token.token)
        .bind(token.resource_id)
        .bind(&token.resource_kind)
        .bind(token.issued_at)
        .execute(conn)
        .await
        .map_err(|e| {
            MetadataError::from_insert(e, || format!("write token for {}", token.resource_id))
        })?;
        Ok(())
    }

    async fn insert_sequence(conn: &mut SqliteConnection, seq: &SequenceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sequences (sequence_id, name, state, user_metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(seq.sequence_id)
        .bind(&seq.name)
        .bind(&seq.state)
        .bind(&seq.user_metadata)
        .bind(seq.created_at)
        .bind(seq.updated_at)
        .execute(conn)
        .await
        .map_err(|e| MetadataError::from_insert(e, || format!("sequence '{}'", seq.name)))?;
        Ok(())
    }

    async fn insert_topic(conn: &mut SqliteConnection, topic: &TopicRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO topics (
                topic_id, sequence_id, path, ontology_tag, serialization_format,
                schema_ref, schema_json, user_metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(topic.topic_id)
        .bind(topic.sequence_id)
        .bind(&topic.path)
        .bind(&topic.ontology_tag)
        .bind(&topic.serialization_format)
        .bind(&topic.schema_ref)
        .bind(&topic.schema_json)
        .bind(&topic.user_metadata)
        .bind(topic.created_at)
        .execute(conn)
        .await
        .map_err(|e| MetadataError::from_insert(e, || format!("topic '{}'", topic.path)))?;
        Ok(())
    }

    async fn insert_indexed_chunk(
        conn: &mut SqliteConnection,
        indexed: &IndexedChunk,
    ) -> MetadataResult<()> {
        let chunk = &indexed.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunks (
                chunk_id, topic_id, sequence_index, object_key, row_count,
                ts_min, ts_max, size_bytes, content_hash, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.chunk_id)
        .bind(chunk.topic_id)
        .bind(chunk.sequence_index)
        .bind(&chunk.object_key)
        .bind(chunk.row_count)
        .bind(chunk.ts_min)
        .bind(chunk.ts_max)
        .bind(chunk.size_bytes)
        .bind(&chunk.content_hash)
        .bind(chunk.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            MetadataError::from_insert(e, || {
                format!("chunk {} of topic {}", chunk.sequence_index, chunk.topic_id)
            })
        })?;

        for entry in &indexed.skip_index {
            sqlx::query(
                "INSERT INTO skip_index (chunk_id, field_path, stats_json) VALUES (?, ?, ?)",
            )
            .bind(entry.chunk_id)
            .bind(&entry.field_path)
            .bind(&entry.stats_json)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn insert_tombstone(
        conn: &mut SqliteConnection,
        tombstone: &TombstoneRow,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gc_tombstones (tombstone_id, resource_kind, resource_id, prefix, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(tombstone.tombstone_id)
        .bind(&tombstone.resource_kind)
        .bind(tombstone.resource_id)
        .bind(&tombstone.prefix)
        .bind(tombstone.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Whether the sequence is uploading and `token` is its live token.
    async fn sequence_writable(
        conn: &mut SqliteConnection,
        sequence_id: Uuid,
        token: Uuid,
    ) -> MetadataResult<bool> {
        let ok: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sequences s
                JOIN write_tokens w ON w.resource_id = s.sequence_id
                WHERE s.sequence_id = ? AND s.state = 'uploading' AND w.token = ?
            )
            "#,
        )
        .bind(sequence_id)
        .bind(token)
        .fetch_one(conn)
        .await?;
        Ok(ok)
    }

    async fn delete_sequence_tokens(
        conn: &mut SqliteConnection,
        sequence_id: Uuid,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            DELETE FROM write_tokens
            WHERE resource_id = ?
               OR resource_id IN (SELECT topic_id FROM topics WHERE sequence_id = ?)
            "#,
        )
        .bind(sequence_id)
        .bind(sequence_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn delete_sequence_rows(
        conn: &mut SqliteConnection,
        sequence_id: Uuid,
    ) -> MetadataResult<()> {
        sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE resource_id = ?
               OR resource_id IN (SELECT topic_id FROM topics WHERE sequence_id = ?)
            "#,
        )
        .bind(sequence_id)
        .bind(sequence_id)
        .execute(&mut *conn)
        .await?;

        delete_sequence_tokens(&mut *conn, sequence_id).await?;

        // Topics, chunks and skip index rows cascade.
        sqlx::query("DELETE FROM sequences WHERE sequence_id = ?")
            .bind(sequence_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Move an uploading sequence to `to` when `token` is live, dropping all its tokens.
    async fn transition_sequence(
        pool: &Pool<Sqlite>,
        sequence_id: Uuid,
        token: Uuid,
        to: &str,
        at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE sequences SET state = ?, updated_at = ?
            WHERE sequence_id = ?
              AND state = 'uploading'
              AND EXISTS (
                SELECT 1 FROM write_tokens w
                WHERE w.resource_id = sequences.sequence_id AND w.token = ?
              )
            "#,
        )
        .bind(to)
        .bind(at)
        .bind(sequence_id)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        delete_sequence_tokens(&mut tx, sequence_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    #[async_trait]
    impl SequenceRepo for SqliteStore {
        #[tracing::instrument(skip(self, sequence, token), fields(name = %sequence.name))]
        async fn create_sequence(
            &self,
            sequence: &SequenceRow,
            token: &WriteTokenRow,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            insert_sequence(&mut tx, sequence).await?;
            insert_token(&mut tx, token).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_sequence(&self, sequence_id: Uuid) -> MetadataResult<Option<SequenceRow>> {
            let row =
                sqlx::query_as::<_, SequenceRow>("SELECT * FROM sequences WHERE sequence_id = ?")
                    .bind(sequence_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_sequence_by_name(&self, name: &str) -> MetadataResult<Option<SequenceRow>> {
            let row = sqlx::query_as::<_, SequenceRow>("SELECT * FROM sequences WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_sequences(&self) -> MetadataResult<Vec<SequenceRow>> {
            let rows = sqlx::query_as::<_, SequenceRow>("SELECT * FROM sequences ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn list_sequences_in_state(&self, state: &str) -> MetadataResult<Vec<SequenceRow>> {
            let rows = sqlx::query_as::<_, SequenceRow>(
                "SELECT * FROM sequences WHERE state = ? ORDER BY name",
            )
            .bind(state)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn archive_sequence(
            &self,
            sequence_id: Uuid,
            token: Uuid,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            transition_sequence(&self.pool, sequence_id, token, "archived", at).await
        }

        async fn mark_sequence_aborted(
            &self,
            sequence_id: Uuid,
            token: Uuid,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            transition_sequence(&self.pool, sequence_id, token, "aborted", at).await
        }

        async fn delete_sequence(
            &self,
            sequence_id: Uuid,
            token: Uuid,
            tombstone: &TombstoneRow,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            if !sequence_writable(&mut tx, sequence_id, token).await? {
                tx.rollback().await?;
                return Ok(false);
            }
            delete_sequence_rows(&mut tx, sequence_id).await?;
            insert_tombstone(&mut tx, tombstone).await?;
            tx.commit().await?;
            Ok(true)
        }

        async fn purge_sequence_rows(&self, sequence_id: Uuid) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            delete_sequence_rows(&mut tx, sequence_id).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn sequence_stats(&self, sequence_id: Uuid) -> MetadataResult<SequenceStats> {
            let stats = sqlx::query_as::<_, SequenceStats>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM topics WHERE sequence_id = ?) AS topic_count,
                    COUNT(c.chunk_id) AS chunk_count,
                    COALESCE(SUM(c.size_bytes), 0) AS total_size_bytes
                FROM chunks c
                JOIN topics t ON t.topic_id = c.topic_id
                WHERE t.sequence_id = ?
                "#,
            )
            .bind(sequence_id)
            .bind(sequence_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(stats)
        }

        #[tracing::instrument(skip(self, restored), fields(name = %restored.sequence.name))]
        async fn restore_sequence(&self, restored: &RestoredSequence) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            insert_sequence(&mut tx, &restored.sequence).await?;
            for topic in &restored.topics {
                insert_topic(&mut tx, topic).await?;
            }
            for chunk in &restored.chunks {
                insert_indexed_chunk(&mut tx, chunk).await?;
            }
            for token in &restored.tokens {
                insert_token(&mut tx, token).await?;
            }
            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl TopicRepo for SqliteStore {
        #[tracing::instrument(skip(self, topic, sequence_token, token), fields(path = %topic.path))]
        async fn create_topic(
            &self,
            topic: &TopicRow,
            sequence_token: Uuid,
            token: &WriteTokenRow,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let state: Option<String> =
                sqlx::query_scalar("SELECT state FROM sequences WHERE sequence_id = ?")
                    .bind(topic.sequence_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            match state.as_deref() {
                None => {
                    return Err(MetadataError::NotFound(format!(
                        "sequence {}",
                        topic.sequence_id
                    )));
                }
                Some(UPLOADING) => {}
                Some(other) => {
                    return Err(MetadataError::InvalidStateTransition {
                        from: other.to_string(),
                        to: UPLOADING.to_string(),
                    });
                }
            }
            if !sequence_writable(&mut tx, topic.sequence_id, sequence_token).await? {
                return Err(MetadataError::Constraint(format!(
                    "stale write token for sequence {}",
                    topic.sequence_id
                )));
            }

            insert_topic(&mut tx, topic).await?;
            insert_token(&mut tx, token).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_topic(&self, topic_id: Uuid) -> MetadataResult<Option<TopicRow>> {
            let row = sqlx::query_as::<_, TopicRow>("SELECT * FROM topics WHERE topic_id = ?")
                .bind(topic_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_topic_by_path(
            &self,
            sequence_id: Uuid,
            path: &str,
        ) -> MetadataResult<Option<TopicRow>> {
            let row = sqlx::query_as::<_, TopicRow>(
                "SELECT * FROM topics WHERE sequence_id = ? AND path = ?",
            )
            .bind(sequence_id)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_topics(&self, sequence_id: Uuid) -> MetadataResult<Vec<TopicRow>> {
            let rows = sqlx::query_as::<_, TopicRow>(
                "SELECT * FROM topics WHERE sequence_id = ? ORDER BY path",
            )
            .bind(sequence_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_topic(
            &self,
            topic_id: Uuid,
            token: Uuid,
            tombstone: &TombstoneRow,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let writable: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM topics t
                    JOIN sequences s ON s.sequence_id = t.sequence_id
                    JOIN write_tokens w ON w.resource_id = t.topic_id
                    WHERE t.topic_id = ? AND s.state = 'uploading' AND w.token = ?
                )
                "#,
            )
            .bind(topic_id)
            .bind(token)
            .fetch_one(&mut *tx)
            .await?;

            if !writable {
                tx.rollback().await?;
                return Ok(false);
            }

            for sql in [
                "DELETE FROM notifications WHERE resource_id = ?",
                "DELETE FROM write_tokens WHERE resource_id = ?",
                "DELETE FROM topics WHERE topic_id = ?",
            ] {
                sqlx::query(sql).bind(topic_id).execute(&mut *tx).await?;
            }
            insert_tombstone(&mut tx, tombstone).await?;
            tx.commit().await?;
            Ok(true)
        }

        async fn topic_stats(&self, topic_id: Uuid) -> MetadataResult<TopicStats> {
            let stats = sqlx::query_as::<_, TopicStats>(
                r#"
                SELECT
                    COUNT(*) AS chunk_count,
                    COALESCE(SUM(row_count), 0) AS row_count,
                    COALESCE(SUM(size_bytes), 0) AS total_size_bytes,
                    MIN(ts_min) AS ts_min,
                    MAX(ts_max) AS ts_max
                FROM chunks WHERE topic_id = ?
                "#,
            )
            .bind(topic_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(stats)
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        #[tracing::instrument(
            skip(self, indexed),
            fields(topic_id = %indexed.chunk.topic_id, index = indexed.chunk.sequence_index)
        )]
        async fn insert_chunk(&self, indexed: &IndexedChunk) -> MetadataResult<()> {
            let chunk = &indexed.chunk;
            let mut tx = self.pool.begin().await?;

            let state: Option<String> = sqlx::query_scalar(
                r#"
                SELECT s.state FROM topics t
                JOIN sequences s ON s.sequence_id = t.sequence_id
                WHERE t.topic_id = ?
                "#,
            )
            .bind(chunk.topic_id)
            .fetch_optional(&mut *tx)
            .await?;
            match state.as_deref() {
                None => {
                    return Err(MetadataError::NotFound(format!("topic {}", chunk.topic_id)));
                }
                Some(UPLOADING) => {}
                Some(other) => {
                    return Err(MetadataError::InvalidStateTransition {
                        from: other.to_string(),
                        to: UPLOADING.to_string(),
                    });
                }
            }

            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE topic_id = ?")
                .bind(chunk.topic_id)
                .fetch_one(&mut *tx)
                .await?;
            if count != chunk.sequence_index {
                return Err(MetadataError::Constraint(format!(
                    "chunk index {} does not follow {} existing chunks of topic {}",
                    chunk.sequence_index, count, chunk.topic_id
                )));
            }

            insert_indexed_chunk(&mut tx, indexed).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn list_chunks(&self, topic_id: Uuid) -> MetadataResult<Vec<ChunkRow>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                "SELECT * FROM chunks WHERE topic_id = ? ORDER BY sequence_index",
            )
            .bind(topic_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_chunks_in_range(
            &self,
            topic_id: Uuid,
            start: i64,
            end: i64,
        ) -> MetadataResult<Vec<ChunkRow>> {
            let rows = sqlx::query_as::<_, ChunkRow>(
                r#"
                SELECT * FROM chunks
                WHERE topic_id = ? AND ts_max >= ? AND ts_min <= ?
                ORDER BY sequence_index
                "#,
            )
            .bind(topic_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_chunks(&self, topic_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE topic_id = ?")
                .bind(topic_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn list_skip_index(&self, topic_id: Uuid) -> MetadataResult<Vec<SkipIndexRow>> {
            let rows = sqlx::query_as::<_, SkipIndexRow>(
                r#"
                SELECT k.chunk_id, k.field_path, k.stats_json
                FROM skip_index k
                JOIN chunks c ON c.chunk_id = k.chunk_id
                WHERE c.topic_id = ?
                ORDER BY c.sequence_index, k.field_path
                "#,
            )
            .bind(topic_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn get_token(&self, resource_id: Uuid) -> MetadataResult<Option<WriteTokenRow>> {
            let row = sqlx::query_as::<_, WriteTokenRow>(
                "SELECT * FROM write_tokens WHERE resource_id = ?",
            )
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn verify_token(&self, resource_id: Uuid, token: Uuid) -> MetadataResult<bool> {
            let ok: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM write_tokens WHERE resource_id = ? AND token = ?)",
            )
            .bind(resource_id)
            .bind(token)
            .fetch_one(&self.pool)
            .await?;
            Ok(ok)
        }
    }

    #[async_trait]
    impl NotificationRepo for SqliteStore {
        async fn create_notification(
            &self,
            notification: &NewNotification,
        ) -> MetadataResult<NotificationRow> {
            let row = sqlx::query_as::<_, NotificationRow>(
                r#"
                INSERT INTO notifications (resource_id, resource_kind, severity, message, created_at)
                VALUES (?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(notification.resource_id)
            .bind(notification.resource_kind.as_str())
            .bind(notification.severity.as_str())
            .bind(&notification.message)
            .bind(notification.created_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_notifications(
            &self,
            resource_id: Uuid,
        ) -> MetadataResult<Vec<NotificationRow>> {
            let rows = sqlx::query_as::<_, NotificationRow>(
                "SELECT * FROM notifications WHERE resource_id = ? ORDER BY notification_id",
            )
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn purge_notifications(&self, resource_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM notifications WHERE resource_id = ?")
                .bind(resource_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl TombstoneRepo for SqliteStore {
        async fn create_tombstone(&self, tombstone: &TombstoneRow) -> MetadataResult<()> {
            let mut conn = self.pool.acquire().await?;
            insert_tombstone(&mut conn, tombstone).await
        }

        async fn list_tombstones(&self, limit: u32) -> MetadataResult<Vec<TombstoneRow>> {
            let rows = sqlx::query_as::<_, TombstoneRow>(
                "SELECT * FROM gc_tombstones ORDER BY created_at LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_tombstone(&self, tombstone_id: Uuid) -> MetadataResult<()> {
            sqlx::query("DELETE FROM gc_tombstones WHERE tombstone_id = ?")
                .bind(tombstone_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn is_tombstoned(&self, prefix: &str) -> MetadataResult<bool> {
            let found: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM gc_tombstones WHERE substr(?, 1, length(prefix)) = prefix)",
            )
            .bind(prefix)
            .fetch_one(&self.pool)
            .await?;
            Ok(found)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sequences (
    sequence_id BLOB PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL CHECK (state IN ('uploading', 'archived', 'aborted')),
    user_metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sequences_state ON sequences(state);

CREATE TABLE IF NOT EXISTS topics (
    topic_id BLOB PRIMARY KEY,
    sequence_id BLOB NOT NULL REFERENCES sequences(sequence_id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    ontology_tag TEXT NOT NULL,
    serialization_format TEXT NOT NULL,
    schema_ref TEXT NOT NULL,
    schema_json TEXT NOT NULL,
    user_metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (sequence_id, path)
);

-- Append-only; sequence_index is gap-free per topic.
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id BLOB PRIMARY KEY,
    topic_id BLOB NOT NULL REFERENCES topics(topic_id) ON DELETE CASCADE,
    sequence_index INTEGER NOT NULL,
    object_key TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    ts_min INTEGER NOT NULL,
    ts_max INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (topic_id, sequence_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_time ON chunks(topic_id, ts_min, ts_max);

CREATE TABLE IF NOT EXISTS skip_index (
    chunk_id BLOB NOT NULL REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    field_path TEXT NOT NULL,
    stats_json TEXT NOT NULL,
    PRIMARY KEY (chunk_id, field_path)
);

-- One live token per resource.
CREATE TABLE IF NOT EXISTS write_tokens (
    token BLOB PRIMARY KEY,
    resource_id BLOB NOT NULL UNIQUE,
    resource_kind TEXT NOT NULL,
    issued_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    notification_id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id BLOB NOT NULL,
    resource_kind TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_resource ON notifications(resource_id);

CREATE TABLE IF NOT EXISTS gc_tombstones (
    tombstone_id BLOB PRIMARY KEY,
    resource_kind TEXT NOT NULL,
    resource_id BLOB NOT NULL,
    prefix TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
