//! Retrieval pipeline
//!
//! A query runs five fixed stages: validate, embed, search, post-process,
//! then the result is assembled. The search filter always pins the tenant
//! and knowledge base. Zero results are a flagged empty result, not an
//! error.

mod stages;

pub use stages::{post_process, PostProcess};

use crate::config::{Config, RetrieveConfig};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::{FilterExpr, VectorSearchHit, VectorStore};
use serde::{Deserialize, Serialize};
use stages::{RetrieveState, STAGES};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Guidance returned with an empty result
pub const EMPTY_RESULT_MESSAGE: &str =
    "No matching knowledge found; run a backfill or widen the time range";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveRequest {
    pub tenant_user_id: String,
    pub question: String,
    /// 0 means the configured default
    pub top_k: usize,
    /// Empty means the configured default
    pub kb_type: String,
    pub source_types: Vec<String>,
    pub source_keys: Vec<String>,
    pub score_threshold: Option<f32>,
    /// 0 means unlimited
    pub max_chunks: usize,
    /// 0 means unlimited
    pub max_content_chars: usize,
    pub dedup_by_same_source: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub vector_id: String,
    pub source_type: String,
    pub source_key: String,
    pub score: f32,
    pub content: String,
    pub metadata_json: String,
}

impl From<VectorSearchHit> for ChunkHit {
    fn from(hit: VectorSearchHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            vector_id: hit.id,
            source_type: hit.source_type,
            source_key: hit.source_key,
            score: hit.score,
            content: hit.content,
            metadata_json: hit.metadata_json,
        }
    }
}

/// Stage timings in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveTimings {
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub post_process_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResult {
    pub query_id: String,
    pub question: String,
    pub kb_id: i64,
    pub chunks: Vec<ChunkHit>,
    /// Hits returned by the vector store, before post-processing
    pub total_hits: usize,
    pub returned_count: usize,
    pub timings: RetrieveTimings,
    pub is_empty: bool,
    pub message: String,
}

pub fn new_query_id() -> String {
    format!("q_{}", uuid::Uuid::new_v4().simple())
}

pub struct RetrievePipeline {
    db: MetaDb,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    dimension: usize,
    default_top_k: usize,
    max_top_k: usize,
    default_kb_type: String,
}

impl RetrievePipeline {
    pub fn new(
        config: &Config,
        db: MetaDb,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let RetrieveConfig {
            default_top_k,
            max_top_k,
            default_kb_type,
        } = &config.retrieve;
        let max_top_k = (*max_top_k).max(1);
        Self {
            db,
            store,
            embedder,
            dimension: config.embedding.dimension,
            default_top_k: (*default_top_k).clamp(1, max_top_k),
            max_top_k,
            default_kb_type: default_kb_type.trim().to_string(),
        }
    }

    /// `top_k` after defaulting and clamping
    pub fn effective_top_k(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_top_k,
            n => n.min(self.max_top_k),
        }
    }

    /// Answer one query.
    ///
    /// The summary line is logged on success and on failure; a failed
    /// query still reports the timings collected before the failure.
    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrieveResult> {
        let start = Instant::now();
        let query_id = new_query_id();
        let mut state = RetrieveState::new(request);
        let mut error: Option<Error> = None;

        for (name, stage) in STAGES {
            if let Err(e) = stage(self, &mut state).await {
                debug!(query_id = %query_id, stage = *name, error = %e, "Retrieve stage failed");
                error = Some(e);
                break;
            }
        }

        state.timings.total_ms = start.elapsed().as_millis() as u64;
        log_summary(&query_id, &state, error.as_ref());

        match error {
            Some(e) => Err(e),
            None => Ok(state.into_result(query_id)),
        }
    }
}

fn log_summary(query_id: &str, state: &RetrieveState, error: Option<&Error>) {
    let req = &state.request;
    let t = &state.timings;

    match error {
        None => {
            let chunk_ids = state
                .kept
                .iter()
                .map(|h| h.chunk_id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            info!(
                query_id,
                tenant_user_id = %req.tenant_user_id,
                kb_id = state.kb_id,
                top_k = req.top_k,
                score_threshold = ?req.score_threshold,
                filter_expr = %state.filter_expr,
                total_hits = state.hits.len(),
                returned_count = state.kept.len(),
                chunk_ids = %chunk_ids,
                embedding_ms = t.embedding_ms,
                search_ms = t.search_ms,
                post_process_ms = t.post_process_ms,
                total_ms = t.total_ms,
                is_empty = state.kept.is_empty(),
                "Retrieve done"
            )
        }
        Some(e) => warn!(
            query_id,
            tenant_user_id = %req.tenant_user_id,
            kb_id = state.kb_id,
            filter_expr = %state.filter_expr,
            total_hits = state.hits.len(),
            embedding_ms = t.embedding_ms,
            search_ms = t.search_ms,
            post_process_ms = t.post_process_ms,
            total_ms = t.total_ms,
            error = %crate::error::scrub_error_message(&e.to_string()),
            "Retrieve failed"
        ),
    }
}

/// Search predicate for a tenant's knowledge base, optionally narrowed
pub fn build_filter(
    tenant_user_id: &str,
    kb_id: i64,
    source_types: &[String],
    source_keys: &[String],
) -> FilterExpr {
    FilterExpr::new()
        .eq_str("tenant_user_id", tenant_user_id)
        .eq_int("kb_id", kb_id)
        .in_list("source_type", source_types)
        .in_list("source_key", source_keys)
}

#[cfg(test)]
mod tests;
