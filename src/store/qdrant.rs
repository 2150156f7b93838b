//! Qdrant-backed vector store
//!
//! All tenants share one collection; isolation comes from the payload
//! filter every search carries. Filtered payload fields are indexed.

use super::filter::FilterExpr;
use super::payload::*;
use super::{VectorSearchHit, VectorStore, VectorUpsertItem};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance,
    FieldType, GetCollectionInfoResponse, PointId, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info};
use uuid::Uuid;

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
            &config.collection_name,
            config.embedding.dimension,
        )
        .await
    }

    /// Create a new store connection directly with URL and collection name
    pub async fn new(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        dimension: usize,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Ensure the collection exists with the configured dimension
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);

            let info = self.client.collection_info(&self.collection).await?;
            if let Some(size) = extract_vector_size(&info) {
                if size as usize != self.dimension {
                    return Err(Error::Qdrant(format!(
                        "Collection '{}' has vector size {}, but embedding.dimension is {}. Use a new collection name or re-ingest with the matching dimension.",
                        self.collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine)),
            )
            .await?;

        let indexes = [
            (FIELD_TENANT_USER_ID, FieldType::Keyword),
            (FIELD_KB_ID, FieldType::Integer),
            (FIELD_SOURCE_TYPE, FieldType::Keyword),
            (FIELD_SOURCE_KEY, FieldType::Keyword),
        ];
        for (field, field_type) in indexes {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    field_type,
                ))
                .await?;
        }

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    fn check_dimensions(&self, items: &[VectorUpsertItem]) -> Result<()> {
        if let Some(bad) = items.iter().find(|i| i.vector.len() != self.dimension) {
            return Err(Error::VectorStore(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {} (id {})",
                self.collection,
                self.dimension,
                bad.vector.len(),
                bad.id
            )));
        }
        Ok(())
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let config = info
        .result
        .as_ref()?
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?
        .config
        .as_ref()?;

    match config {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}

/// Point ids must be UUIDs
fn parse_point_id(id: &str) -> Result<PointId> {
    Uuid::try_parse(id)
        .map(|u| PointId::from(u.to_string()))
        .map_err(|_| Error::VectorStore(format!("Vector id is not a UUID: {}", id)))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, items: Vec<VectorUpsertItem>) -> Result<Vec<String>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        self.check_dimensions(&items)?;
        for item in &items {
            parse_point_id(&item.id)?;
        }

        debug!(
            "Upserting {} points to collection {}",
            items.len(),
            self.collection
        );

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let points: Vec<PointStruct> = items.into_iter().map(|i| i.to_point_struct()).collect();

        // A single request is applied atomically by Qdrant
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;

        Ok(ids)
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter_expr: &str,
    ) -> Result<Vec<VectorSearchHit>> {
        let expr = FilterExpr::parse(filter_expr)?;
        debug!(
            "Searching collection {} with limit {}",
            self.collection, top_k
        );

        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector, top_k as u64).with_payload(true);
        if let Some(filter) = expr.to_qdrant_filter() {
            builder = builder.filter(filter);
        }

        let response = self.client.search_points(builder).await?;
        Ok(response.result.into_iter().map(VectorSearchHit::from).collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        debug!(
            "Deleting {} points from collection {}",
            ids.len(),
            self.collection
        );

        let ids = ids
            .iter()
            .map(|id| parse_point_id(id))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(ids)
                    .wait(true),
            )
            .await?;

        Ok(())
    }

    fn backend(&self) -> &str {
        "qdrant"
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, dim: usize) -> VectorUpsertItem {
        VectorUpsertItem {
            id: id.to_string(),
            vector: vec![0.1; dim],
            tenant_user_id: "U1".to_string(),
            kb_id: 1,
            source_type: "self_profile".to_string(),
            source_key: "U1".to_string(),
            chunk_id: 1,
            content: "c".to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let store = QdrantStore::new("http://127.0.0.1:6334", None, "test_collection", 3)
            .await
            .expect("store should initialize");

        let err = store
            .upsert(vec![item(&Uuid::new_v4().to_string(), 2)])
            .await
            .expect_err("should reject mismatched vector length");

        match err {
            Error::VectorStore(message) => assert!(message.contains("dimension mismatch")),
            other => panic!("expected vector store error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_rejects_non_uuid_ids() {
        let store = QdrantStore::new("http://127.0.0.1:6334", None, "test_collection", 3)
            .await
            .unwrap();

        let err = store.upsert(vec![item("v_abc", 3)]).await.unwrap_err();
        assert!(matches!(err, Error::VectorStore(_)));
    }

    #[tokio::test]
    async fn test_search_rejects_bad_filter() {
        let store = QdrantStore::new("http://127.0.0.1:6334", None, "test_collection", 3)
            .await
            .unwrap();

        let err = store
            .search(vec![0.0; 3], 5, "tenant_user_id = 'x'")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VectorStore(_)));
    }
}
