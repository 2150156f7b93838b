use super::*;
use crate::embed::HashEmbedder;
use crate::ingest::{IngestPipeline, IngestRequest};
use crate::meta::tests::setup_test_db;
use crate::store::{MemoryVectorStore, VectorUpsertItem};
use async_trait::async_trait;
use tempfile::TempDir;

const DIM: usize = 16;

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = DIM;
    config.embedding.provider = "hash".to_string();
    config
}

fn hit(id: &str, score: f32, source_key: &str, content: &str) -> VectorSearchHit {
    VectorSearchHit {
        id: id.to_string(),
        score,
        tenant_user_id: "U1".to_string(),
        kb_id: 1,
        source_type: "chat_private".to_string(),
        source_key: source_key.to_string(),
        chunk_id: id.trim_start_matches('v').parse().unwrap_or(0),
        content: content.to_string(),
        metadata_json: "{}".to_string(),
    }
}

/// Returns canned hits regardless of the query
struct FixedStore(Vec<VectorSearchHit>);

#[async_trait]
impl VectorStore for FixedStore {
    async fn upsert(&self, items: Vec<VectorUpsertItem>) -> Result<Vec<String>> {
        Ok(items.into_iter().map(|i| i.id).collect())
    }

    async fn search(&self, _v: Vec<f32>, top_k: usize, _f: &str) -> Result<Vec<VectorSearchHit>> {
        Ok(self.0.iter().take(top_k).cloned().collect())
    }

    async fn delete_by_ids(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &str {
        "fixed"
    }

    fn collection(&self) -> &str {
        "test"
    }
}

async fn fixed_pipeline(hits: Vec<VectorSearchHit>) -> (RetrievePipeline, TempDir) {
    let (db, tmp) = setup_test_db().await;
    let pipeline = RetrievePipeline::new(
        &test_config(),
        db,
        Arc::new(FixedStore(hits)),
        Arc::new(HashEmbedder::new(DIM)),
    );
    (pipeline, tmp)
}

fn question(tenant: &str, q: &str) -> RetrieveRequest {
    RetrieveRequest {
        tenant_user_id: tenant.to_string(),
        question: q.to_string(),
        ..Default::default()
    }
}

fn scores(hits: &[VectorSearchHit]) -> Vec<f32> {
    hits.iter().map(|h| h.score).collect()
}

#[test]
fn test_post_process_threshold_sort_and_cap() {
    let hits = vec![
        hit("v1", 0.9, "a", "x"),
        hit("v2", 0.95, "b", "x"),
        hit("v3", 0.4, "c", "x"),
        hit("v4", 0.95, "d", "x"),
    ];
    let opts = PostProcess {
        score_threshold: Some(0.5),
        max_chunks: 2,
        ..Default::default()
    };

    let kept = post_process(hits, &opts);
    assert_eq!(scores(&kept), vec![0.95, 0.95]);
    assert_eq!(kept[0].id, "v2");
    assert_eq!(kept[1].id, "v4");
}

#[test]
fn test_post_process_dedup_keeps_best_per_source() {
    let hits = vec![
        hit("v1", 0.7, "a", "x"),
        hit("v2", 0.9, "a", "x"),
        hit("v3", 0.8, "b", "x"),
        hit("v4", 0.6, "b", "x"),
    ];
    let kept = post_process(
        hits.clone(),
        &PostProcess {
            dedup_by_same_source: true,
            ..Default::default()
        },
    );
    let ids: Vec<&str> = kept.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["v2", "v3"]);

    // Without dedup everything survives, best first
    let kept = post_process(hits, &PostProcess::default());
    assert_eq!(scores(&kept), vec![0.9, 0.8, 0.7, 0.6]);
}

#[test]
fn test_post_process_content_budget_never_splits() {
    let hits = vec![
        hit("v1", 0.9, "a", "héllo"),
        hit("v2", 0.8, "b", "world"),
        hit("v3", 0.7, "c", "!"),
    ];

    let budget = |n| {
        post_process(
            hits.clone(),
            &PostProcess {
                max_content_chars: n,
                ..Default::default()
            },
        )
        .len()
    };
    assert_eq!(budget(10), 2);
    assert_eq!(budget(11), 3);
    assert_eq!(budget(9), 1);
    assert_eq!(budget(4), 0);
}

#[tokio::test]
async fn test_retrieve_reports_totals() {
    let hits = vec![
        hit("v1", 0.9, "a", "x"),
        hit("v2", 0.95, "b", "x"),
        hit("v3", 0.4, "c", "x"),
        hit("v4", 0.95, "d", "x"),
    ];
    let (pipeline, _tmp) = fixed_pipeline(hits).await;

    let result = pipeline
        .retrieve(RetrieveRequest {
            score_threshold: Some(0.5),
            max_chunks: 2,
            ..question("U1", "where is the harbour?")
        })
        .await
        .unwrap();

    assert_eq!(result.total_hits, 4);
    assert_eq!(result.returned_count, 2);
    assert_eq!(
        result.chunks.iter().map(|c| c.score).collect::<Vec<_>>(),
        vec![0.95, 0.95]
    );
    assert_eq!(result.chunks[0].chunk_id, 2);
    assert_eq!(result.chunks[0].vector_id, "v2");
    assert!(!result.is_empty);
    assert!(result.message.is_empty());
    assert!(result.kb_id > 0);
    assert!(result.timings.total_ms >= result.timings.search_ms);
}

#[tokio::test]
async fn test_empty_kb_is_flagged_not_an_error() {
    let (db, _tmp) = setup_test_db().await;
    let pipeline = RetrievePipeline::new(
        &test_config(),
        db.clone(),
        Arc::new(MemoryVectorStore::new("test", DIM)),
        Arc::new(HashEmbedder::new(DIM)),
    );

    let result = pipeline.retrieve(question("U9", "anything?")).await.unwrap();
    assert_eq!(result.returned_count, 0);
    assert_eq!(result.total_hits, 0);
    assert!(result.is_empty);
    assert_eq!(result.message, EMPTY_RESULT_MESSAGE);
    assert!(result.query_id.starts_with("q_"));
    assert_eq!(result.query_id.len(), 2 + 32);

    // The knowledge base was created lazily
    let kb = db.get_knowledge_base(result.kb_id).await.unwrap().unwrap();
    assert_eq!(kb.owner_id, "U9");
    assert_eq!(kb.kb_type, "global");
}

#[tokio::test]
async fn test_tenant_isolation() {
    let (db, _tmp) = setup_test_db().await;
    let config = test_config();
    let store = Arc::new(MemoryVectorStore::new("test", DIM));
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let ingest = IngestPipeline::new(&config, db.clone(), store.clone(), embedder.clone());

    for (tenant, doc) in [
        ("U1", "Prefers tea over coffee."),
        ("U2", "favourite drink"),
    ] {
        ingest
            .ingest(IngestRequest::document(tenant, "self_profile", tenant, doc.to_string()))
            .await
            .into_result()
            .unwrap();
    }

    let pipeline = RetrievePipeline::new(&config, db, store, embedder);
    // U2's document is an exact match for the question
    let result = pipeline
        .retrieve(question("U1", "favourite drink"))
        .await
        .unwrap();

    assert_eq!(result.returned_count, 1);
    assert!(result.chunks.iter().all(|c| c.source_key == "U1"));
    assert!(result.chunks[0].content.contains("tea"));
}

#[tokio::test]
async fn test_source_filters_narrow_the_search() {
    let (db, _tmp) = setup_test_db().await;
    let config = test_config();
    let store = Arc::new(MemoryVectorStore::new("test", DIM));
    let embedder = Arc::new(HashEmbedder::new(DIM));
    let ingest = IngestPipeline::new(&config, db.clone(), store.clone(), embedder.clone());

    for (source_type, key, doc) in [
        ("contact_profile", "U2", "Bob sails on weekends."),
        ("group_profile", "G1", "The crew sails on Fridays."),
    ] {
        ingest
            .ingest(IngestRequest::document("U1", source_type, key, doc.to_string()))
            .await
            .into_result()
            .unwrap();
    }

    let pipeline = RetrievePipeline::new(&config, db, store, embedder);
    let result = pipeline
        .retrieve(RetrieveRequest {
            source_types: vec!["group_profile".to_string(), " ".to_string()],
            ..question("U1", "who sails?")
        })
        .await
        .unwrap();
    assert_eq!(result.returned_count, 1);
    assert_eq!(result.chunks[0].source_key, "G1");

    let result = pipeline
        .retrieve(RetrieveRequest {
            source_keys: vec!["U2".to_string()],
            ..question("U1", "who sails?")
        })
        .await
        .unwrap();
    assert_eq!(result.returned_count, 1);
    assert_eq!(result.chunks[0].source_type, "contact_profile");
}

#[tokio::test]
async fn test_validation_and_embedding_failures() {
    let (pipeline, _tmp) = fixed_pipeline(Vec::new()).await;
    assert!(pipeline
        .retrieve(question(" ", "hi"))
        .await
        .unwrap_err()
        .is_validation());
    assert!(pipeline
        .retrieve(question("U1", "   "))
        .await
        .unwrap_err()
        .is_validation());

    let (db, _tmp2) = setup_test_db().await;
    let mismatched = RetrievePipeline::new(
        &test_config(),
        db,
        Arc::new(FixedStore(Vec::new())),
        Arc::new(HashEmbedder::new(DIM / 2)),
    );
    let err = mismatched.retrieve(question("U1", "hi")).await.unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));
}

#[tokio::test]
async fn test_top_k_is_defaulted_and_clamped() {
    let many: Vec<VectorSearchHit> = (1..=80)
        .map(|i| hit(&format!("v{}", i), 1.0 - i as f32 / 100.0, "a", "x"))
        .collect();
    let (pipeline, _tmp) = fixed_pipeline(many).await;

    assert_eq!(pipeline.effective_top_k(0), 5);
    assert_eq!(pipeline.effective_top_k(7), 7);
    assert_eq!(pipeline.effective_top_k(500), 50);

    let result = pipeline.retrieve(question("U1", "q")).await.unwrap();
    assert_eq!(result.total_hits, 5);
    let result = pipeline
        .retrieve(RetrieveRequest {
            top_k: 500,
            ..question("U1", "q")
        })
        .await
        .unwrap();
    assert_eq!(result.total_hits, 50);
}
