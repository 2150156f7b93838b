//! Vector store abstraction
//!
//! Both pipelines go through the [`VectorStore`] trait:
//! - `upsert` is all-or-nothing per call
//! - `search` takes an opaque conjunctive filter expression (see `filter`)
//! - `delete_by_ids` removes points by their external id
//!
//! The relational `vector_records` table is the source of truth; whatever
//! lives here can be rebuilt from it.

pub mod filter;
mod memory;
mod payload;
mod qdrant;

pub use filter::FilterExpr;
pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A vector plus the tags needed for tenant-scoped filtering
#[derive(Debug, Clone, PartialEq)]
pub struct VectorUpsertItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub tenant_user_id: String,
    pub kb_id: i64,
    pub source_type: String,
    pub source_key: String,
    pub chunk_id: i64,
    pub content: String,
    pub metadata_json: String,
}

/// A ranked search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchHit {
    pub id: String,
    pub score: f32,
    pub tenant_user_id: String,
    pub kb_id: i64,
    pub source_type: String,
    pub source_key: String,
    pub chunk_id: i64,
    pub content: String,
    pub metadata_json: String,
}

/// Capability contract required from a vector database
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write every item or none; returns the accepted ids
    async fn upsert(&self, items: Vec<VectorUpsertItem>) -> Result<Vec<String>>;

    /// Best `top_k` hits for `vector` among points matching `filter_expr`
    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter_expr: &str,
    ) -> Result<Vec<VectorSearchHit>>;

    /// Delete points by id (unknown ids are ignored)
    async fn delete_by_ids(&self, ids: &[String]) -> Result<()>;

    /// Backend label recorded on vector records
    fn backend(&self) -> &str;

    /// Collection the points live in
    fn collection(&self) -> &str;
}

/// Create the configured vector store, preparing its collection
pub async fn create_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.vector_store.trim().to_lowercase().as_str() {
        "qdrant" => {
            let store = QdrantStore::connect(config).await?;
            store.ensure_collection().await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryVectorStore::new(
            &config.collection_name,
            config.embedding.dimension,
        ))),
        other => Err(Error::Config(format!(
            "Unsupported vector store '{}'; expected 'qdrant' or 'memory'",
            other
        ))),
    }
}
