//! Default values for configuration

/// Default vector store backend
pub fn default_vector_store() -> String {
    "qdrant".to_string()
}

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default collection name
pub fn default_collection_name() -> String {
    "kbforge_chunks".to_string()
}

/// Default embedding backend URL
pub fn default_embedding_url() -> String {
    std::env::var("KBFORGE_EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default embedding endpoint path, relative to the backend URL
pub fn default_embedding_endpoint() -> String {
    "/v1/embed/text".to_string()
}

/// Default embedding provider label recorded on vector records
pub fn default_embedding_provider() -> String {
    "http".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-zh-v1.5".to_string()
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    512
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding request timeout
pub fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Default retries per embedding request
pub fn default_embedding_retries() -> usize {
    2
}

/// Default environment variable name for the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "KBFORGE_EMBEDDING_API_KEY".to_string()
}

/// Default chunk size in characters
pub fn default_chunk_size() -> usize {
    500
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    50
}

/// Default: plain sliding window rather than structural splitting
pub fn default_chunk_structural() -> bool {
    false
}

/// Default chat turn merge window (5 minutes)
pub fn default_merge_window_secs() -> u64 {
    300
}

/// Max characters of chunk content written to the vector store
pub fn default_ingest_content_max_chars() -> usize {
    4096
}

/// Default number of vectors per upsert call
pub fn default_ingest_upsert_batch_size() -> usize {
    64
}

/// Default ingest topic
pub fn default_topic() -> String {
    "kbforge.ingest".to_string()
}

/// Default relay claim batch size
pub fn default_outbox_batch_size() -> usize {
    200
}

/// Default relay poll interval
pub fn default_outbox_poll_interval_ms() -> u64 {
    500
}

/// Default backoff base
pub fn default_backoff_base_ms() -> u64 {
    500
}

/// Default backoff cap (5 minutes)
pub fn default_backoff_max_ms() -> u64 {
    300_000
}

/// Default lease on a relay claim before the rows become claimable again
pub fn default_outbox_claim_lease_secs() -> u64 {
    300
}

/// Default messages per chat page
pub fn default_consumer_page_size() -> usize {
    200
}

/// Default page cap for non-backfill chat page events
pub fn default_consumer_max_pages() -> usize {
    50
}

/// Default time after which a `processing` event is considered abandoned
pub fn default_consumer_stale_after_secs() -> u64 {
    900
}

/// Default reaper sweep interval
pub fn default_consumer_reaper_interval_secs() -> u64 {
    60
}

/// Default number of consumer workers
pub fn default_consumer_workers() -> usize {
    2
}

/// Default number of transport partitions
pub fn default_partitions() -> usize {
    4
}

/// Default top-k
pub fn default_retrieve_top_k() -> usize {
    5
}

/// Maximum top-k
pub fn default_retrieve_max_top_k() -> usize {
    50
}

/// Default knowledge base type
pub fn default_kb_type() -> String {
    "global".to_string()
}
