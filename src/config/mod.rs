//! Configuration management for kbforge
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vector store backend: "qdrant" or "memory"
    #[serde(default = "default_vector_store")]
    pub vector_store: String,

    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Chat turn merging
    #[serde(default)]
    pub merge: MergeConfig,

    /// Ingestion pipeline
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Outbox relay
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Ingest consumer workers
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Retrieval pipeline
    #[serde(default)]
    pub retrieve: RetrieveConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend base URL
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Endpoint path joined onto `url`
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Provider label recorded on vector records
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Per-request timeout
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries per request
    #[serde(default = "default_embedding_retries")]
    pub retries: usize,

    /// Environment variable holding a bearer token, if any
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_size")]
    pub size: usize,

    /// Overlap characters between chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,

    /// Prefer paragraph/sentence boundaries
    #[serde(default = "default_chunk_structural")]
    pub structural: bool,
}

/// Chat turn merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Maximum gap between messages of one segment
    #[serde(default = "default_merge_window_secs")]
    pub window_secs: u64,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Chunk content written to the vector store is cut to this many characters
    #[serde(default = "default_ingest_content_max_chars")]
    pub content_max_chars: usize,

    /// Vectors per upsert call
    #[serde(default = "default_ingest_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

/// Outbox relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Topic to publish to; empty falls back to the topic recorded on the event
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Events claimed per pass
    #[serde(default = "default_outbox_batch_size")]
    pub batch_size: usize,

    /// Sleep between empty passes
    #[serde(default = "default_outbox_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Backoff base for failed publishes and failed claims
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long a claim holds rows in `publishing`
    #[serde(default = "default_outbox_claim_lease_secs")]
    pub claim_lease_secs: u64,

    /// Partitions of the in-process transport
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

/// Consumer worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Topic to consume
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Default chat page size (capped at 200)
    #[serde(default = "default_consumer_page_size")]
    pub page_size: usize,

    /// Page cap for incremental chat events
    #[serde(default = "default_consumer_max_pages")]
    pub max_pages: usize,

    /// Processing claims older than this are reset by the reaper
    #[serde(default = "default_consumer_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Reaper sweep interval
    #[serde(default = "default_consumer_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Worker count in `serve`
    #[serde(default = "default_consumer_workers")]
    pub workers: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveConfig {
    /// Default number of results
    #[serde(default = "default_retrieve_top_k")]
    pub default_top_k: usize,

    /// Upper clamp for top-k
    #[serde(default = "default_retrieve_max_top_k")]
    pub max_top_k: usize,

    /// Knowledge base type used when the request leaves it empty
    #[serde(default = "default_kb_type")]
    pub default_kb_type: String,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for kbforge data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Root of the file-backed reader data
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store: default_vector_store(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            collection_name: default_collection_name(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            merge: MergeConfig::default(),
            ingest: IngestConfig::default(),
            outbox: OutboxConfig::default(),
            consumer: ConsumerConfig::default(),
            retrieve: RetrieveConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            endpoint: default_embedding_endpoint(),
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
            retries: default_embedding_retries(),
            api_key_env: default_embedding_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    /// Read the bearer token from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            structural: default_chunk_structural(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            window_secs: default_merge_window_secs(),
        }
    }
}

impl MergeConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            content_max_chars: default_ingest_content_max_chars(),
            upsert_batch_size: default_ingest_upsert_batch_size(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            batch_size: default_outbox_batch_size(),
            poll_interval_ms: default_outbox_poll_interval_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            claim_lease_secs: default_outbox_claim_lease_secs(),
            partitions: default_partitions(),
        }
    }
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            page_size: default_consumer_page_size(),
            max_pages: default_consumer_max_pages(),
            stale_after_secs: default_consumer_stale_after_secs(),
            reaper_interval_secs: default_consumer_reaper_interval_secs(),
            workers: default_consumer_workers(),
        }
    }
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_retrieve_top_k(),
            max_top_k: default_retrieve_max_top_k(),
            default_kb_type: default_kb_type(),
        }
    }
}

impl Config {
    /// Get the default base directory for kbforge (~/.kbforge)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kbforge")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("kbforge.db"),
            data_dir: base.join("data"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.init_paths(Some(base));
        config.paths.config_file = config_path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        if self.qdrant_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.chunk.size == 0 {
            return Err(Error::Config("chunk.size must be positive".to_string()));
        }

        if self.chunk.overlap >= self.chunk.size {
            return Err(Error::Config(
                "chunk.overlap must be < chunk.size".to_string(),
            ));
        }

        if self.ingest.content_max_chars == 0 || self.ingest.upsert_batch_size == 0 {
            return Err(Error::Config(
                "ingest.content_max_chars and ingest.upsert_batch_size must be positive"
                    .to_string(),
            ));
        }

        if self.outbox.batch_size == 0 {
            return Err(Error::Config(
                "outbox.batch_size must be positive".to_string(),
            ));
        }

        if self.outbox.backoff_base_ms == 0 || self.outbox.backoff_base_ms > self.outbox.backoff_max_ms
        {
            return Err(Error::Config(
                "outbox.backoff_base_ms must be positive and <= outbox.backoff_max_ms".to_string(),
            ));
        }

        if self.outbox.partitions == 0 {
            return Err(Error::Config(
                "outbox.partitions must be positive".to_string(),
            ));
        }

        if self.consumer.page_size == 0 || self.consumer.page_size > 200 {
            return Err(Error::Config(
                "consumer.page_size must be between 1 and 200".to_string(),
            ));
        }

        if self.consumer.workers == 0 {
            return Err(Error::Config(
                "consumer.workers must be positive".to_string(),
            ));
        }

        if self.retrieve.max_top_k == 0
            || self.retrieve.default_top_k == 0
            || self.retrieve.default_top_k > self.retrieve.max_top_k
        {
            return Err(Error::Config(
                "retrieve.default_top_k must be between 1 and retrieve.max_top_k".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collection_name, "kbforge_chunks");
        assert_eq!(config.outbox.batch_size, 200);
        assert_eq!(config.consumer.page_size, 200);
        assert_eq!(config.retrieve.default_top_k, 5);
        assert_eq!(config.retrieve.max_top_k, 50);
        assert_eq!(config.ingest.content_max_chars, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.collection_name = "test_collection".to_string();
        config.outbox.topic = "custom.topic".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.collection_name, "test_collection");
        assert_eq!(loaded.outbox.topic, "custom.topic");
        assert_eq!(loaded.paths.db_file, tmp.path().join("kbforge.db"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[chunk]\nsize = 300\n\n[outbox]\nbatch_size = 10\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.chunk.size, 300);
        assert_eq!(config.chunk.overlap, 50);
        assert_eq!(config.outbox.batch_size, 10);
        assert_eq!(config.outbox.poll_interval_ms, 500);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.chunk.overlap = config.chunk.size;
        assert!(config.validate().is_err());
        config.chunk.overlap = 20;
        assert!(config.validate().is_ok());

        config.consumer.page_size = 201;
        assert!(config.validate().is_err());
        config.consumer.page_size = 200;

        config.outbox.backoff_base_ms = config.outbox.backoff_max_ms + 1;
        assert!(config.validate().is_err());
        config.outbox.backoff_base_ms = 500;

        config.retrieve.default_top_k = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let tmp = TempDir::new().unwrap();
        let err = Config::load(&tmp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
