//! Retrieve stages

use super::{
    build_filter, ChunkHit, RetrievePipeline, RetrieveRequest, RetrieveResult, RetrieveTimings,
    EMPTY_RESULT_MESSAGE,
};
use crate::error::{Error, Result};
use crate::store::VectorSearchHit;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::Instant;

pub(crate) type Stage =
    for<'a> fn(&'a RetrievePipeline, &'a mut RetrieveState) -> BoxFuture<'a, Result<()>>;

pub(crate) const STAGES: &[(&str, Stage)] = &[
    ("validate", validate),
    ("embed", embed),
    ("search", search),
    ("post_process", post_process_stage),
];

pub(crate) struct RetrieveState {
    pub(crate) request: RetrieveRequest,
    pub(crate) kb_id: i64,
    pub(crate) filter_expr: String,
    query_vector: Vec<f32>,
    /// Raw hits from the store
    pub(crate) hits: Vec<VectorSearchHit>,
    /// Hits that survived post-processing
    pub(crate) kept: Vec<VectorSearchHit>,
    pub(crate) timings: RetrieveTimings,
}

impl RetrieveState {
    pub(crate) fn new(request: RetrieveRequest) -> Self {
        Self {
            request,
            kb_id: 0,
            filter_expr: String::new(),
            query_vector: Vec::new(),
            hits: Vec::new(),
            kept: Vec::new(),
            timings: RetrieveTimings::default(),
        }
    }

    pub(crate) fn into_result(self, query_id: String) -> RetrieveResult {
        let returned_count = self.kept.len();
        let is_empty = returned_count == 0;
        RetrieveResult {
            query_id,
            question: self.request.question,
            kb_id: self.kb_id,
            total_hits: self.hits.len(),
            returned_count,
            chunks: self.kept.into_iter().map(ChunkHit::from).collect(),
            timings: self.timings,
            is_empty,
            message: if is_empty {
                EMPTY_RESULT_MESSAGE.to_string()
            } else {
                String::new()
            },
        }
    }
}

/// Post-processing options, applied in field order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcess {
    /// Drop hits scoring below this
    pub score_threshold: Option<f32>,
    /// Keep only the best hit per (source_type, source_key)
    pub dedup_by_same_source: bool,
    /// 0 means unlimited
    pub max_chunks: usize,
    /// Cumulative content budget in characters; 0 means unlimited
    pub max_content_chars: usize,
}

impl PostProcess {
    pub fn from_request(req: &RetrieveRequest) -> Self {
        Self {
            score_threshold: req.score_threshold,
            dedup_by_same_source: req.dedup_by_same_source,
            max_chunks: req.max_chunks,
            max_content_chars: req.max_content_chars,
        }
    }
}

/// Threshold, dedup, sort by score descending, cap the count, then cap the
/// content budget. A chunk that would overflow the budget ends the list;
/// chunks are never cut.
pub fn post_process(mut hits: Vec<VectorSearchHit>, opts: &PostProcess) -> Vec<VectorSearchHit> {
    if let Some(threshold) = opts.score_threshold {
        hits.retain(|h| h.score >= threshold);
    }

    if opts.dedup_by_same_source {
        let mut best: HashMap<(String, String), usize> = HashMap::new();
        let mut deduped: Vec<VectorSearchHit> = Vec::with_capacity(hits.len());
        for hit in hits {
            let key = (hit.source_type.clone(), hit.source_key.clone());
            match best.get(&key) {
                Some(&i) => {
                    if hit.score > deduped[i].score {
                        deduped[i] = hit;
                    }
                }
                None => {
                    best.insert(key, deduped.len());
                    deduped.push(hit);
                }
            }
        }
        hits = deduped;
    }

    // Stable: equal scores keep store order
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));

    if opts.max_chunks > 0 {
        hits.truncate(opts.max_chunks);
    }

    if opts.max_content_chars > 0 {
        let mut used = 0;
        let fits = hits
            .iter()
            .take_while(|h| {
                used += h.content.chars().count();
                used <= opts.max_content_chars
            })
            .count();
        hits.truncate(fits);
    }

    hits
}

fn validate<'a>(p: &'a RetrievePipeline, s: &'a mut RetrieveState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let req = &mut s.request;
        req.tenant_user_id = req.tenant_user_id.trim().to_string();
        req.question = req.question.trim().to_string();
        if req.tenant_user_id.is_empty() {
            return Err(Error::validation("missing tenant_user_id"));
        }
        if req.question.is_empty() {
            return Err(Error::validation("missing question"));
        }

        req.top_k = p.effective_top_k(req.top_k);
        req.kb_type = match req.kb_type.trim() {
            "" => p.default_kb_type.clone(),
            kb_type => kb_type.to_string(),
        };

        s.kb_id = p.db.ensure_user_kb(&req.tenant_user_id, &req.kb_type).await?;
        s.filter_expr =
            build_filter(&req.tenant_user_id, s.kb_id, &req.source_types, &req.source_keys)
                .to_string();
        Ok(())
    })
}

fn embed<'a>(p: &'a RetrievePipeline, s: &'a mut RetrieveState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let start = Instant::now();
        let vectors = p.embedder.embed(vec![s.request.question.clone()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("embedding result is empty".to_string()))?;
        if vector.len() != p.dimension {
            return Err(Error::Embedding(format!(
                "embedding dim mismatch: got={} want={}",
                vector.len(),
                p.dimension
            )));
        }
        s.query_vector = vector;
        s.timings.embedding_ms = start.elapsed().as_millis() as u64;
        Ok(())
    })
}

fn search<'a>(p: &'a RetrievePipeline, s: &'a mut RetrieveState) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let start = Instant::now();
        let vector = std::mem::take(&mut s.query_vector);
        s.hits = p
            .store
            .search(vector, s.request.top_k, &s.filter_expr)
            .await?;
        s.timings.search_ms = start.elapsed().as_millis() as u64;
        Ok(())
    })
}

fn post_process_stage<'a>(
    _p: &'a RetrievePipeline,
    s: &'a mut RetrieveState,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let start = Instant::now();
        s.kept = post_process(s.hits.clone(), &PostProcess::from_request(&s.request));
        s.timings.post_process_ms = start.elapsed().as_millis() as u64;
        Ok(())
    })
}
