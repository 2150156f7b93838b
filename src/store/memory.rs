//! In-process vector store
//!
//! A keyed map behind a reader/writer lock. Reads copy hits out, so no
//! reference into the map escapes the lock.

use super::filter::FilterExpr;
use super::{VectorSearchHit, VectorStore, VectorUpsertItem};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryVectorStore {
    collection: String,
    dimension: usize,
    points: RwLock<HashMap<String, VectorUpsertItem>>,
}

impl MemoryVectorStore {
    pub fn new(collection: &str, dimension: usize) -> Self {
        Self {
            collection: collection.to_string(),
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored points
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    /// Copy of a stored point
    pub async fn get(&self, id: &str) -> Option<VectorUpsertItem> {
        self.points.read().await.get(id).cloned()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, items: Vec<VectorUpsertItem>) -> Result<Vec<String>> {
        // Validate everything before touching the map
        if let Some(bad) = items.iter().find(|i| i.vector.len() != self.dimension) {
            return Err(Error::VectorStore(format!(
                "Vector dimension mismatch: expected {}, got {} (id {})",
                self.dimension,
                bad.vector.len(),
                bad.id
            )));
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let mut points = self.points.write().await;
        for item in items {
            points.insert(item.id.clone(), item);
        }
        Ok(ids)
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter_expr: &str,
    ) -> Result<Vec<VectorSearchHit>> {
        let expr = FilterExpr::parse(filter_expr)?;
        let points = self.points.read().await;

        let mut hits: Vec<VectorSearchHit> = points
            .values()
            .map(|p| VectorSearchHit {
                id: p.id.clone(),
                score: cosine(&vector, &p.vector),
                tenant_user_id: p.tenant_user_id.clone(),
                kb_id: p.kb_id,
                source_type: p.source_type.clone(),
                source_key: p.source_key.clone(),
                chunk_id: p.chunk_id,
                content: p.content.clone(),
                metadata_json: p.metadata_json.clone(),
            })
            .filter(|h| expr.matches(h))
            .collect();
        drop(points);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        let mut points = self.points.write().await;
        for id in ids {
            points.remove(id);
        }
        Ok(())
    }

    fn backend(&self) -> &str {
        "memory"
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}
