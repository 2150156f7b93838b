//! Ingest stages
//!
//! Each stage is a plain async function over the shared state; the list is
//! fixed at compile time.

use super::{chunk_key, vector_id, IngestPipeline, IngestRequest, IngestStats, INGEST_KB_TYPE};
use crate::chunk::compute_text_hash;
use crate::error::{truncate_chars, Error, Result};
use crate::meta::{ChunkDisposition, ChunkDraft};
use crate::store::VectorUpsertItem;
use futures::future::BoxFuture;
use tracing::{debug, warn};

pub(crate) type Stage =
    for<'a> fn(&'a IngestPipeline, &'a mut IngestState) -> BoxFuture<'a, Result<()>>;

pub(crate) const STAGES: &[(&str, Stage)] = &[
    ("prepare", prepare),
    ("merge", merge),
    ("chunk", chunk),
    ("persist", persist),
    ("embed", embed),
    ("upsert", upsert),
];

/// One segment of text ready for chunking
struct SegmentText {
    index: usize,
    session_id: String,
    text: String,
}

/// One chunk before persistence
struct ChunkText {
    segment_index: usize,
    chunk_index: usize,
    session_id: String,
    content: String,
}

/// A persisted chunk that still needs a vector
struct WorkItem {
    chunk_id: i64,
    vector_id: String,
    content: String,
    metadata_json: String,
}

pub(crate) struct IngestState {
    request: IngestRequest,
    pub(crate) stats: IngestStats,
    segments: Vec<SegmentText>,
    chunks: Vec<ChunkText>,
    work: Vec<WorkItem>,
    embedded: Vec<VectorUpsertItem>,
    succeeded: Vec<String>,
    failed: Vec<(String, String)>,
    /// First batch-level embed or upsert failure
    pub(crate) batch_error: Option<Error>,
}

impl IngestState {
    pub(crate) fn new(request: IngestRequest) -> Self {
        Self {
            request,
            stats: IngestStats::default(),
            segments: Vec::new(),
            chunks: Vec::new(),
            work: Vec::new(),
            embedded: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            batch_error: None,
        }
    }

    fn fail_batch<'a>(&mut self, ids: impl Iterator<Item = &'a String>, err: Error) {
        let msg = err.to_string();
        self.failed.extend(ids.map(|id| (id.clone(), msg.clone())));
        self.batch_error.get_or_insert(err);
    }
}

fn prepare<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let req = &mut s.request;
        req.tenant_user_id = req.tenant_user_id.trim().to_string();
        req.source_type = req.source_type.trim().to_string();
        req.source_key = req.source_key.trim().to_string();

        if req.tenant_user_id.is_empty() {
            return Err(Error::validation("missing tenant_user_id"));
        }
        if req.source_type.is_empty() || req.source_key.is_empty() {
            return Err(Error::validation("missing source_type/source_key"));
        }

        s.stats.tenant_user_id = req.tenant_user_id.clone();
        s.stats.source_type = req.source_type.clone();
        s.stats.source_key = req.source_key.clone();
        s.stats.messages = req.messages.len();

        s.stats.kb_id = p.db.ensure_user_kb(&req.tenant_user_id, INGEST_KB_TYPE).await?;
        s.stats.source_id = p
            .db
            .ensure_knowledge_source(
                s.stats.kb_id,
                &req.tenant_user_id,
                &req.source_type,
                &req.source_key,
            )
            .await?;
        Ok(())
    })
}

fn merge<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let req = &s.request;
        s.segments = if !req.documents.is_empty() {
            req.documents
                .iter()
                .enumerate()
                .filter(|(_, d)| !d.trim().is_empty())
                .map(|(index, d)| SegmentText {
                    index,
                    session_id: req.session_uuid.clone(),
                    text: d.trim().to_string(),
                })
                .collect()
        } else {
            p.merger
                .merge(&req.messages)
                .into_iter()
                .map(|seg| SegmentText {
                    index: seg.segment_index,
                    session_id: seg.session_id,
                    text: seg.text,
                })
                .collect()
        };
        s.stats.segments = s.segments.len();
        Ok(())
    })
}

fn chunk<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for seg in &s.segments {
            for (chunk_index, part) in p.chunker.chunk(&seg.text).into_iter().enumerate() {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                s.chunks.push(ChunkText {
                    segment_index: seg.index,
                    chunk_index,
                    session_id: seg.session_id.clone(),
                    content: part.to_string(),
                });
            }
        }
        s.stats.chunks = s.chunks.len();
        Ok(())
    })
}

fn chunk_metadata(req: &IngestRequest, c: &ChunkText) -> String {
    let session_uuid = if req.session_uuid.is_empty() {
        c.session_id.as_str()
    } else {
        req.session_uuid.as_str()
    };
    serde_json::json!({
        "session_uuid": session_uuid,
        "session_type": req.session_type,
        "session_name": req.session_name,
        "segment_index": c.segment_index,
        "chunk_index": c.chunk_index,
    })
    .to_string()
}

fn persist<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if s.chunks.is_empty() {
            return Ok(());
        }

        let req = &s.request;
        let drafts: Vec<ChunkDraft> = s
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let content_hash = compute_text_hash(&c.content);
                let key = chunk_key(
                    &req.tenant_user_id,
                    &req.source_type,
                    &req.source_key,
                    c.segment_index,
                    c.chunk_index,
                    &content_hash,
                );
                let vid = vector_id(
                    &req.tenant_user_id,
                    &req.source_type,
                    &req.source_key,
                    &key,
                    p.dimension,
                );
                ChunkDraft {
                    kb_id: s.stats.kb_id,
                    source_id: s.stats.source_id,
                    chunk_key: key,
                    chunk_index: i as i64,
                    content: c.content.clone(),
                    content_hash,
                    metadata_json: chunk_metadata(req, c),
                    vector_id: vid,
                    vector_store: p.store.backend().to_string(),
                    collection: p.store.collection().to_string(),
                    embedding_provider: p.embedder.provider().to_string(),
                    embedding_model: p.embedder.model_name().to_string(),
                    dim: p.dimension as i64,
                }
            })
            .collect();

        let dispositions = p.db.persist_chunks(&drafts).await?;

        for (draft, disposition) in drafts.into_iter().zip(dispositions) {
            match disposition {
                ChunkDisposition::Skip { .. } => s.stats.vectors_skip += 1,
                ChunkDisposition::Embed {
                    chunk_id,
                    vector_id,
                } => s.work.push(WorkItem {
                    chunk_id,
                    vector_id,
                    content: draft.content,
                    metadata_json: draft.metadata_json,
                }),
            }
        }

        debug!(
            to_embed = s.work.len(),
            skipped = s.stats.vectors_skip,
            "Chunks persisted"
        );
        Ok(())
    })
}

fn embed<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let work = std::mem::take(&mut s.work);

        for batch in work.chunks(p.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|w| w.content.clone()).collect();
            let vectors = match p.embedder.embed(texts).await {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    let err = Error::Embedding(format!(
                        "embedding count mismatch: sent {}, got {}",
                        batch.len(),
                        v.len()
                    ));
                    s.fail_batch(batch.iter().map(|w| &w.vector_id), err);
                    continue;
                }
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "Embedding batch failed");
                    s.fail_batch(batch.iter().map(|w| &w.vector_id), e);
                    continue;
                }
            };

            for (item, vector) in batch.iter().zip(vectors) {
                if vector.len() != p.dimension {
                    s.failed.push((
                        item.vector_id.clone(),
                        format!(
                            "vector dim mismatch got={} want={}",
                            vector.len(),
                            p.dimension
                        ),
                    ));
                    continue;
                }

                s.embedded.push(VectorUpsertItem {
                    id: item.vector_id.clone(),
                    vector,
                    tenant_user_id: s.request.tenant_user_id.clone(),
                    kb_id: s.stats.kb_id,
                    source_type: s.request.source_type.clone(),
                    source_key: s.request.source_key.clone(),
                    chunk_id: item.chunk_id,
                    content: truncate_chars(&item.content, p.content_max_chars),
                    metadata_json: item.metadata_json.clone(),
                });
            }
        }
        Ok(())
    })
}

fn upsert<'a>(p: &'a IngestPipeline, s: &'a mut IngestState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let embedded = std::mem::take(&mut s.embedded);
        let mut batches = embedded.into_iter().peekable();

        while batches.peek().is_some() {
            let batch: Vec<VectorUpsertItem> = batches.by_ref().take(p.upsert_batch_size).collect();
            let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();

            match p.store.upsert(batch).await {
                Ok(_) => s.succeeded.extend(ids),
                Err(e) => {
                    warn!(batch = ids.len(), error = %e, "Vector upsert batch failed");
                    s.fail_batch(ids.iter(), e);
                }
            }
        }
        Ok(())
    })
}

/// Record the outcome of every vector touched by this call
pub(crate) fn reconcile<'a>(
    p: &'a IngestPipeline,
    s: &'a mut IngestState,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        s.stats.vectors_ok = s.succeeded.len();
        s.stats.vectors_fail = s.failed.len();

        p.db.mark_vectors_failed(&s.failed).await?;
        p.db.mark_vectors_succeeded(&s.succeeded).await?;
        Ok(())
    })
}
