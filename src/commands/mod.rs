//! CLI commands implementation

pub mod enqueue;
pub mod ingest;
pub mod init;
pub mod query;
pub mod serve;
pub mod status;

pub use enqueue::*;
pub use ingest::*;
pub use init::*;
pub use query::*;
pub use serve::*;
pub use status::*;

use crate::config::Config;
use crate::embed::{create_embedder, Embedder};
use crate::enqueue::EventProducer;
use crate::error::Result;
use crate::ingest::IngestPipeline;
use crate::meta::MetaDb;
use crate::reader::FsReader;
use crate::retrieve::RetrievePipeline;
use crate::store::{create_vector_store, VectorStore};
use std::sync::Arc;

/// Everything a command needs, opened from one config
pub struct Services {
    pub config: Config,
    pub db: MetaDb,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub reader: Arc<FsReader>,
}

impl Services {
    pub async fn open(config: Config) -> Result<Self> {
        let db = MetaDb::connect(&config).await?;
        let store = create_vector_store(&config).await?;
        let embedder = create_embedder(&config.embedding)?;
        let reader = Arc::new(FsReader::new(&config.paths.data_dir));
        Ok(Self {
            config,
            db,
            store,
            embedder,
            reader,
        })
    }

    pub fn ingest_pipeline(&self) -> Arc<IngestPipeline> {
        Arc::new(IngestPipeline::new(
            &self.config,
            self.db.clone(),
            self.store.clone(),
            self.embedder.clone(),
        ))
    }

    pub fn retrieve_pipeline(&self) -> RetrievePipeline {
        RetrievePipeline::new(
            &self.config,
            self.db.clone(),
            self.store.clone(),
            self.embedder.clone(),
        )
    }

    /// Producer writing events onto the configured outbox topic
    pub fn producer(&self) -> EventProducer {
        EventProducer::new(self.db.clone()).with_topic(self.config.outbox.topic.clone())
    }
}

/// Shorten `text` to `max` characters for console previews
pub(crate) fn preview(text: &str, max: usize) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}
