//! Idempotent ingestion pipeline
//!
//! An ingest call runs a fixed list of stages over one [`IngestState`]:
//!
//! 1. `prepare`: validate the request, ensure the knowledge base and source
//! 2. `merge`: turn messages (or documents) into segments
//! 3. `chunk`: split segments into bounded chunks
//! 4. `persist`: dedup against stored chunks, write new rows in one transaction
//! 5. `embed`: batch-embed the chunks that still need a vector
//! 6. `upsert`: write vectors to the vector store
//!
//! Status reconciliation runs after the stages whether or not one failed,
//! so vectors that were written are always recorded as such.

mod identity;
mod stages;

pub use identity::*;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::merge::TurnMerger;
use crate::meta::{CommonStatus, MetaDb};
use crate::reader::ChatMessage;
use crate::store::VectorStore;
use serde::{Deserialize, Serialize};
use stages::{reconcile, IngestState, STAGES};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Knowledge base type every ingested source lands in
pub const INGEST_KB_TYPE: &str = "global";

/// What to ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    pub tenant_user_id: String,
    pub source_type: String,
    pub source_key: String,
    #[serde(default)]
    pub session_uuid: String,
    #[serde(default)]
    pub session_type: i64,
    #[serde(default)]
    pub session_name: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Free-text documents; when present they are used instead of messages
    #[serde(default)]
    pub documents: Vec<String>,
}

impl IngestRequest {
    /// A single-document request, as used for profile snapshots
    pub fn document(tenant_user_id: &str, source_type: &str, source_key: &str, doc: String) -> Self {
        Self {
            tenant_user_id: tenant_user_id.to_string(),
            source_type: source_type.to_string(),
            source_key: source_key.to_string(),
            documents: vec![doc],
            ..Default::default()
        }
    }
}

/// Counters reported by an ingest call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub tenant_user_id: String,
    pub source_type: String,
    pub source_key: String,
    pub kb_id: i64,
    pub source_id: i64,
    pub messages: usize,
    pub segments: usize,
    pub chunks: usize,
    pub vectors_ok: usize,
    pub vectors_skip: usize,
    pub vectors_fail: usize,
    pub duration_ms: u64,
}

/// Partial counts plus the error that stopped the call, if any
#[derive(Debug)]
pub struct IngestOutcome {
    pub stats: IngestStats,
    pub error: Option<Error>,
}

impl IngestOutcome {
    pub fn into_result(self) -> Result<IngestStats> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

/// Ingestion pipeline handle, cheap to share behind an `Arc`
pub struct IngestPipeline {
    db: MetaDb,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    merger: TurnMerger,
    dimension: usize,
    embed_batch_size: usize,
    upsert_batch_size: usize,
    content_max_chars: usize,
}

impl IngestPipeline {
    pub fn new(
        config: &Config,
        db: MetaDb,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            db,
            store,
            embedder,
            chunker: Chunker::from_config(&config.chunk),
            merger: TurnMerger::from_config(&config.merge),
            dimension: config.embedding.dimension,
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.ingest.upsert_batch_size.max(1),
            content_max_chars: config.ingest.content_max_chars,
        }
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    /// Run every stage, then reconcile vector statuses.
    ///
    /// Never discards progress: the counts are returned together with the
    /// error that stopped the call.
    pub async fn ingest(&self, request: IngestRequest) -> IngestOutcome {
        let start = Instant::now();
        let mut state = IngestState::new(request);
        let mut error = None;

        for (name, stage) in STAGES {
            if let Err(e) = stage(self, &mut state).await {
                debug!(stage = *name, error = %e, "Ingest stage failed");
                error = Some(e);
                break;
            }
        }

        if let Err(e) = reconcile(self, &mut state).await {
            warn!(error = %e, "Failed to reconcile vector statuses");
            error.get_or_insert(e);
        }

        let error = error.or_else(|| state.batch_error.take());
        let mut stats = state.stats;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        match &error {
            None => info!(
                tenant_user_id = %stats.tenant_user_id,
                source_type = %stats.source_type,
                source_key = %stats.source_key,
                chunks = stats.chunks,
                ok = stats.vectors_ok,
                skip = stats.vectors_skip,
                fail = stats.vectors_fail,
                ms = stats.duration_ms,
                "Ingest done"
            ),
            Some(e) => warn!(
                tenant_user_id = %stats.tenant_user_id,
                source_type = %stats.source_type,
                source_key = %stats.source_key,
                chunks = stats.chunks,
                ok = stats.vectors_ok,
                skip = stats.vectors_skip,
                fail = stats.vectors_fail,
                ms = stats.duration_ms,
                error = %e,
                "Ingest finished with errors"
            ),
        }

        IngestOutcome { stats, error }
    }

    /// Remove a source's vectors, chunks and vector records.
    ///
    /// With `disable` the source row is also marked disabled. A source that
    /// was never ingested is not an error.
    pub async fn purge_source(
        &self,
        tenant_user_id: &str,
        source_type: &str,
        source_key: &str,
        disable: bool,
    ) -> Result<u64> {
        let tenant = tenant_user_id.trim();
        let source_type = source_type.trim();
        let source_key = source_key.trim();
        if tenant.is_empty() || source_type.is_empty() || source_key.is_empty() {
            return Err(Error::validation("missing tenant_user_id/source_type/source_key"));
        }

        let kb_id = self.db.ensure_user_kb(tenant, INGEST_KB_TYPE).await?;
        let Some(source) = self
            .db
            .get_knowledge_source(kb_id, tenant, source_type, source_key)
            .await?
        else {
            debug!(tenant_user_id = %tenant, source_type, source_key, "Nothing to purge");
            return Ok(0);
        };

        let ids = self.db.list_source_vector_ids(source.id).await?;
        if !ids.is_empty() {
            self.store.delete_by_ids(&ids).await?;
        }
        let deleted = self.db.delete_source_chunks(source.id).await?;
        if disable {
            self.db
                .set_source_status(source.id, CommonStatus::Disabled)
                .await?;
        }

        info!(
            tenant_user_id = %tenant,
            source_type,
            source_key,
            vectors = ids.len(),
            chunks = deleted,
            disabled = disable,
            "Purged source"
        );
        Ok(deleted)
    }
}
