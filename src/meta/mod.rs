//! Knowledge repository backed by SQLite
//!
//! This module owns every durable status transition:
//! - Knowledge bases and sources ("ensure" upserts)
//! - Content-addressed chunks and their vector records
//! - The ingest event outbox (see `events`)
//! - Backfill job counters (see `events`)

mod events;
mod schema;

pub use events::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Owner type of per-user knowledge bases
pub const OWNER_TYPE_USER: &str = "user";

/// How long a connection waits on another writer before failing with SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Declares a lowercase string-backed status enum with Display/FromStr
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(Error::Config(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// Enabled/disabled flag shared by knowledge bases, sources and chunks
    CommonStatus {
        Enabled => "enabled",
        Disabled => "disabled",
    }
);

string_enum!(
    /// Embedding status of a vector record
    EmbedStatus {
        Pending => "pending",
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

string_enum!(
    /// Relay-side status of an ingest event
    PublishStatus {
        Pending => "pending",
        Publishing => "publishing",
        Published => "published",
        Failed => "failed",
    }
);

string_enum!(
    /// Consumer-side status of an ingest event
    EventStatus {
        Pending => "pending",
        Processing => "processing",
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

string_enum!(
    /// Backfill job status
    JobStatus {
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
    }
);

string_enum!(
    /// Kinds of ingest events the consumer knows how to process
    EventType {
        SelfProfile => "self_profile",
        ContactProfile => "contact_profile",
        GroupProfile => "group_profile",
        ChatMessagesPage => "chat_messages_page",
    }
);

/// Current time in the fixed-width format used by every timestamp column
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Format a timestamp so lexical order matches chronological order
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A knowledge base row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: i64,
    pub owner_type: String,
    pub owner_id: String,
    pub kb_type: String,
    pub name: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A knowledge source row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: i64,
    pub kb_id: i64,
    pub tenant_user_id: String,
    pub source_type: String,
    pub source_key: String,
    pub acl_json: String,
    pub version: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl KnowledgeSource {
    pub fn get_status(&self) -> Result<CommonStatus> {
        self.status.parse()
    }
}

/// A chunk row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub kb_id: i64,
    pub source_id: i64,
    pub chunk_key: String,
    pub chunk_index: i64,
    pub content: String,
    pub content_hash: String,
    pub metadata_json: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A vector record row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: i64,
    pub chunk_id: i64,
    pub vector_store: String,
    pub collection: String,
    pub vector_id: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dim: i64,
    pub embed_status: String,
    pub error_msg: Option<String>,
    pub embedded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl VectorRecord {
    pub fn get_status(&self) -> Result<EmbedStatus> {
        self.embed_status.parse()
    }
}

/// Everything needed to persist one chunk and its pending vector record
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub kb_id: i64,
    pub source_id: i64,
    pub chunk_key: String,
    pub chunk_index: i64,
    pub content: String,
    pub content_hash: String,
    pub metadata_json: String,
    pub vector_id: String,
    pub vector_store: String,
    pub collection: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dim: i64,
}

/// What dedup-aware persistence decided for a chunk draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Already embedded; nothing to do
    Skip { chunk_id: i64, vector_id: String },
    /// Needs embedding under this vector id (new or previously unfinished)
    Embed { chunk_id: i64, vector_id: String },
}

/// Count of rows per status value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub in_flight: i64,
    pub done: i64,
    pub failed: i64,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config)
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='ingest_events'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    // ===== Knowledge Base Operations =====

    /// Create the knowledge base if absent and return its id
    pub async fn ensure_knowledge_base(
        &self,
        owner_type: &str,
        owner_id: &str,
        kb_type: &str,
        name: &str,
    ) -> Result<i64> {
        let now = now_timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO knowledge_bases (owner_type, owner_id, kb_type, name, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'enabled', ?, ?)
            ON CONFLICT(owner_type, owner_id, kb_type) DO UPDATE SET
                name = excluded.name,
                status = 'enabled',
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(owner_type)
        .bind(owner_id)
        .bind(kb_type)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Ensure the per-user knowledge base of the given type
    pub async fn ensure_user_kb(&self, tenant_user_id: &str, kb_type: &str) -> Result<i64> {
        self.ensure_knowledge_base(OWNER_TYPE_USER, tenant_user_id, kb_type, kb_type)
            .await
    }

    /// Get a knowledge base by id
    pub async fn get_knowledge_base(&self, id: i64) -> Result<Option<KnowledgeBase>> {
        let kb = sqlx::query_as::<_, KnowledgeBase>("SELECT * FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(kb)
    }

    // ===== Source Operations =====

    /// Create the source if absent (re-enabling it otherwise) and return its id
    pub async fn ensure_knowledge_source(
        &self,
        kb_id: i64,
        tenant_user_id: &str,
        source_type: &str,
        source_key: &str,
    ) -> Result<i64> {
        let now = now_timestamp();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO knowledge_sources
                (kb_id, tenant_user_id, source_type, source_key, acl_json, version, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, '{}', 1, 'enabled', ?, ?)
            ON CONFLICT(kb_id, source_type, source_key, tenant_user_id) DO UPDATE SET
                status = 'enabled',
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(kb_id)
        .bind(tenant_user_id)
        .bind(source_type)
        .bind(source_key)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Look up a source by its natural key
    pub async fn get_knowledge_source(
        &self,
        kb_id: i64,
        tenant_user_id: &str,
        source_type: &str,
        source_key: &str,
    ) -> Result<Option<KnowledgeSource>> {
        let source = sqlx::query_as::<_, KnowledgeSource>(
            r#"
            SELECT * FROM knowledge_sources
            WHERE kb_id = ? AND tenant_user_id = ? AND source_type = ? AND source_key = ?
            "#,
        )
        .bind(kb_id)
        .bind(tenant_user_id)
        .bind(source_type)
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    /// Enable or disable a source
    pub async fn set_source_status(&self, source_id: i64, status: CommonStatus) -> Result<()> {
        sqlx::query("UPDATE knowledge_sources SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_timestamp())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump a source's version, returning the new value
    pub async fn bump_source_version(&self, source_id: i64) -> Result<i64> {
        let version: i64 = sqlx::query_scalar(
            "UPDATE knowledge_sources SET version = version + 1, updated_at = ? WHERE id = ? RETURNING version",
        )
        .bind(now_timestamp())
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    // ===== Chunk Operations =====

    /// Dedup-aware persistence of a batch of chunk drafts.
    ///
    /// Runs in one transaction: either every new chunk and vector record is
    /// written, or none is. Each draft starts with its insert so the
    /// transaction holds the write lock before it reads anything.
    pub async fn persist_chunks(&self, drafts: &[ChunkDraft]) -> Result<Vec<ChunkDisposition>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let now = now_timestamp();
            let inserted: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO knowledge_chunks
                    (kb_id, source_id, chunk_key, chunk_index, content, content_hash,
                     metadata_json, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 'enabled', ?, ?)
                ON CONFLICT(chunk_key) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(draft.kb_id)
            .bind(draft.source_id)
            .bind(&draft.chunk_key)
            .bind(draft.chunk_index)
            .bind(&draft.content)
            .bind(&draft.content_hash)
            .bind(&draft.metadata_json)
            .bind(&now)
            .bind(&now)
            .fetch_optional(&mut *tx)
            .await?;

            let disposition = match inserted {
                Some(chunk_id) => {
                    insert_vector_record(&mut tx, chunk_id, draft).await?;
                    ChunkDisposition::Embed {
                        chunk_id,
                        vector_id: draft.vector_id.clone(),
                    }
                }
                None => {
                    let chunk_id: i64 =
                        sqlx::query_scalar("SELECT id FROM knowledge_chunks WHERE chunk_key = ?")
                            .bind(&draft.chunk_key)
                            .fetch_one(&mut *tx)
                            .await?;
                    let record = sqlx::query_as::<_, VectorRecord>(
                        "SELECT * FROM vector_records WHERE chunk_id = ?",
                    )
                    .bind(chunk_id)
                    .fetch_optional(&mut *tx)
                    .await?;

                    match record {
                        Some(r) if r.embed_status == EmbedStatus::Succeeded.as_str() => {
                            ChunkDisposition::Skip {
                                chunk_id,
                                vector_id: r.vector_id,
                            }
                        }
                        Some(r) => ChunkDisposition::Embed {
                            chunk_id,
                            vector_id: r.vector_id,
                        },
                        None => {
                            insert_vector_record(&mut tx, chunk_id, draft).await?;
                            ChunkDisposition::Embed {
                                chunk_id,
                                vector_id: draft.vector_id.clone(),
                            }
                        }
                    }
                }
            };
            out.push(disposition);
        }

        tx.commit().await?;
        Ok(out)
    }

    /// List chunks of a source in index order
    pub async fn list_source_chunks(&self, source_id: i64) -> Result<Vec<KnowledgeChunk>> {
        let chunks = sqlx::query_as::<_, KnowledgeChunk>(
            "SELECT * FROM knowledge_chunks WHERE source_id = ? ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    /// Count all chunk rows
    pub async fn count_chunks(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    // ===== Vector Record Operations =====

    /// Get a vector record by its external id
    pub async fn get_vector_record(&self, vector_id: &str) -> Result<Option<VectorRecord>> {
        let record = sqlx::query_as::<_, VectorRecord>(
            "SELECT * FROM vector_records WHERE vector_id = ?",
        )
        .bind(vector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Count all vector record rows
    pub async fn count_vector_records(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Mark vector records succeeded, stamping `embedded_at`
    pub async fn mark_vectors_succeeded(&self, vector_ids: &[String]) -> Result<()> {
        if vector_ids.is_empty() {
            return Ok(());
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        for id in vector_ids {
            sqlx::query(
                r#"
                UPDATE vector_records
                SET embed_status = 'succeeded', error_msg = NULL, embedded_at = ?, updated_at = ?
                WHERE vector_id = ?
                "#,
            )
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Mark vector records failed with a per-record error message
    pub async fn mark_vectors_failed(&self, failures: &[(String, String)]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        for (id, msg) in failures {
            sqlx::query(
                r#"
                UPDATE vector_records
                SET embed_status = 'failed', error_msg = ?, updated_at = ?
                WHERE vector_id = ?
                "#,
            )
            .bind(crate::error::scrub_error_message(msg))
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All vector ids belonging to a source
    pub async fn list_source_vector_ids(&self, source_id: i64) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT v.vector_id FROM vector_records v
            JOIN knowledge_chunks c ON c.id = v.chunk_id
            WHERE c.source_id = ?
            ORDER BY v.id
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Delete every chunk and vector record of a source
    pub async fn delete_source_chunks(&self, source_id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM vector_records WHERE chunk_id IN (SELECT id FROM knowledge_chunks WHERE source_id = ?)",
        )
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM knowledge_chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    /// Vector record counts by embed status
    pub async fn vector_status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT embed_status, COUNT(*) FROM vector_records GROUP BY embed_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.parse::<EmbedStatus>() {
                Ok(EmbedStatus::Pending) => counts.pending += n,
                Ok(EmbedStatus::Succeeded) => counts.done += n,
                Ok(EmbedStatus::Failed) => counts.failed += n,
                Err(_) => debug!(status = %status, "Ignoring unknown embed status"),
            }
        }
        Ok(counts)
    }
}

async fn insert_vector_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunk_id: i64,
    draft: &ChunkDraft,
) -> Result<()> {
    let now = now_timestamp();
    sqlx::query(
        r#"
        INSERT INTO vector_records
            (chunk_id, vector_store, collection, vector_id, embedding_provider, embedding_model,
             dim, embed_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(chunk_id)
    .bind(&draft.vector_store)
    .bind(&draft.collection)
    .bind(&draft.vector_id)
    .bind(&draft.embedding_provider)
    .bind(&draft.embedding_model)
    .bind(draft.dim)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = MetaDb::connect(&config).await.unwrap();
        (db, tmp)
    }

    fn draft(kb_id: i64, source_id: i64, key: &str, vector_id: &str) -> ChunkDraft {
        ChunkDraft {
            kb_id,
            source_id,
            chunk_key: key.to_string(),
            chunk_index: 0,
            content: format!("content of {}", key),
            content_hash: format!("hash-{}", key),
            metadata_json: "{}".to_string(),
            vector_id: vector_id.to_string(),
            vector_store: "memory".to_string(),
            collection: "test".to_string(),
            embedding_provider: "test".to_string(),
            embedding_model: "test-model".to_string(),
            dim: 4,
        }
    }

    #[tokio::test]
    async fn test_ensure_kb_is_idempotent() {
        let (db, _tmp) = setup_test_db().await;

        let a = db.ensure_user_kb("u1", "global").await.unwrap();
        let b = db.ensure_user_kb("u1", "global").await.unwrap();
        let c = db.ensure_user_kb("u2", "global").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);

        let kb = db.get_knowledge_base(a).await.unwrap().unwrap();
        assert_eq!(kb.owner_type, OWNER_TYPE_USER);
        assert_eq!(kb.kb_type, "global");
    }

    #[tokio::test]
    async fn test_ensure_source_reenables() {
        let (db, _tmp) = setup_test_db().await;
        let kb = db.ensure_user_kb("u1", "global").await.unwrap();

        let id = db
            .ensure_knowledge_source(kb, "u1", "chat_private", "U2")
            .await
            .unwrap();
        db.set_source_status(id, CommonStatus::Disabled).await.unwrap();
        assert_eq!(db.bump_source_version(id).await.unwrap(), 2);

        let again = db
            .ensure_knowledge_source(kb, "u1", "chat_private", "U2")
            .await
            .unwrap();
        assert_eq!(id, again);

        let source = db
            .get_knowledge_source(kb, "u1", "chat_private", "U2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.get_status().unwrap(), CommonStatus::Enabled);
        assert_eq!(source.version, 2);
    }

    #[tokio::test]
    async fn test_persist_chunks_dedup() {
        let (db, _tmp) = setup_test_db().await;
        let kb = db.ensure_user_kb("u1", "global").await.unwrap();
        let src = db
            .ensure_knowledge_source(kb, "u1", "self_profile", "u1")
            .await
            .unwrap();

        let drafts = vec![draft(kb, src, "ck_a", "v-a"), draft(kb, src, "ck_b", "v-b")];
        let first = db.persist_chunks(&drafts).await.unwrap();
        assert!(first
            .iter()
            .all(|d| matches!(d, ChunkDisposition::Embed { .. })));

        // Unfinished chunks are handed back for embedding under the same id
        let second = db.persist_chunks(&drafts).await.unwrap();
        assert_eq!(first, second);

        db.mark_vectors_succeeded(&["v-a".to_string()]).await.unwrap();
        db.mark_vectors_failed(&[("v-b".to_string(), "boom".to_string())])
            .await
            .unwrap();

        let third = db.persist_chunks(&drafts).await.unwrap();
        assert!(matches!(third[0], ChunkDisposition::Skip { .. }));
        assert!(matches!(third[1], ChunkDisposition::Embed { .. }));

        assert_eq!(db.count_chunks().await.unwrap(), 2);
        assert_eq!(db.count_vector_records().await.unwrap(), 2);

        let a = db.get_vector_record("v-a").await.unwrap().unwrap();
        assert_eq!(a.get_status().unwrap(), EmbedStatus::Succeeded);
        assert!(a.embedded_at.is_some());

        let b = db.get_vector_record("v-b").await.unwrap().unwrap();
        assert_eq!(b.get_status().unwrap(), EmbedStatus::Failed);
        assert_eq!(b.error_msg.as_deref(), Some("boom"));

        let counts = db.vector_status_counts().await.unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn test_persist_chunks_is_atomic() {
        let (db, _tmp) = setup_test_db().await;
        let kb = db.ensure_user_kb("u1", "global").await.unwrap();
        let src = db
            .ensure_knowledge_source(kb, "u1", "self_profile", "u1")
            .await
            .unwrap();

        // Second draft collides on the unique vector_id and aborts the batch
        let drafts = vec![draft(kb, src, "ck_a", "v-same"), draft(kb, src, "ck_b", "v-same")];
        assert!(db.persist_chunks(&drafts).await.is_err());

        assert_eq!(db.count_chunks().await.unwrap(), 0);
        assert_eq!(db.count_vector_records().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_persist_chunks_concurrent_writers() {
        let (db, _tmp) = setup_test_db().await;
        let kb = db.ensure_user_kb("u1", "global").await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..8 {
            let db = db.clone();
            tasks.spawn(async move {
                let src = db
                    .ensure_knowledge_source(kb, "u1", "chat_private", &format!("peer-{}", writer))
                    .await?;
                for round in 0..30 {
                    // Every writer also races on one shared chunk per round
                    let drafts = vec![
                        draft(kb, src, &format!("ck-{}-{}", writer, round), &format!("v-{}-{}", writer, round)),
                        draft(kb, src, &format!("ck-shared-{}", round), &format!("v-shared-{}", round)),
                    ];
                    let persisted = db.persist_chunks(&drafts).await?;
                    assert_eq!(persisted.len(), 2);
                }
                Ok::<_, Error>(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(db.count_chunks().await.unwrap(), 8 * 30 + 30);
        assert_eq!(db.count_vector_records().await.unwrap(), 8 * 30 + 30);
    }

    #[tokio::test]
    async fn test_delete_source_chunks() {
        let (db, _tmp) = setup_test_db().await;
        let kb = db.ensure_user_kb("u1", "global").await.unwrap();
        let src = db
            .ensure_knowledge_source(kb, "u1", "group_profile", "G1")
            .await
            .unwrap();
        let other = db
            .ensure_knowledge_source(kb, "u1", "group_profile", "G2")
            .await
            .unwrap();

        db.persist_chunks(&[draft(kb, src, "ck_1", "v-1"), draft(kb, other, "ck_2", "v-2")])
            .await
            .unwrap();

        assert_eq!(db.list_source_vector_ids(src).await.unwrap(), vec!["v-1"]);
        assert_eq!(db.delete_source_chunks(src).await.unwrap(), 1);
        assert!(db.list_source_vector_ids(src).await.unwrap().is_empty());
        assert_eq!(db.count_chunks().await.unwrap(), 1);
        assert_eq!(db.count_vector_records().await.unwrap(), 1);
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("publishing".parse::<PublishStatus>().unwrap(), PublishStatus::Publishing);
        assert_eq!(EventType::ChatMessagesPage.to_string(), "chat_messages_page");
        assert!("bogus".parse::<EventStatus>().is_err());
    }
}
