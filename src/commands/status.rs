//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::{BackfillJob, EventStats, MetaDb, StatusCounts};
use serde::Serialize;
use tracing::info;

/// Jobs shown by default
pub const STATUS_JOB_LIMIT: usize = 5;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub data_dir: String,
    pub vector_store: String,
    pub qdrant_url: String,
    pub collection_name: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub events: EventStats,
    pub chunk_count: i64,
    pub vectors: StatusCounts,
    pub recent_jobs: Vec<BackfillJob>,
}

/// Gather outbox, vector and job state from the metadata database
pub async fn cmd_status(
    config: &Config,
    db: &MetaDb,
    tenant_user_id: Option<&str>,
    job_limit: usize,
) -> Result<StatusInfo> {
    info!("Getting status");

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        data_dir: config.paths.data_dir.display().to_string(),
        vector_store: config.vector_store.clone(),
        qdrant_url: config.qdrant_url.clone(),
        collection_name: config.collection_name.clone(),
        embedding_model: config.embedding.model.clone(),
        embedding_dimension: config.embedding.dimension,
        events: db.event_stats().await?,
        chunk_count: db.count_chunks().await?,
        vectors: db.vector_status_counts().await?,
        recent_jobs: db.list_backfill_jobs(tenant_user_id, job_limit).await?,
    })
}

fn print_counts(label: &str, counts: &StatusCounts) {
    println!(
        "  {:<10} pending {:>6} | in flight {:>6} | done {:>6} | failed {:>6}",
        label, counts.pending, counts.in_flight, counts.done, counts.failed
    );
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 kbforge Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Reader data: {}", status.data_dir);
    println!("\nVector store: {}", status.vector_store);
    if status.vector_store == "qdrant" {
        println!("  URL: {}", status.qdrant_url);
    }
    println!("  Collection: {}", status.collection_name);
    println!(
        "\nEmbedding Model: {} ({} dims)",
        status.embedding_model, status.embedding_dimension
    );

    println!("\nOutbox:");
    print_counts("publish", &status.events.publish);
    print_counts("process", &status.events.process);

    println!("\nIndex:");
    println!("  Chunks: {}", status.chunk_count);
    print_counts("vectors", &status.vectors);

    println!("\nRecent backfill jobs:");
    if status.recent_jobs.is_empty() {
        println!("  None. Use 'kbforge backfill <tenant>' to schedule one.");
    }
    for job in &status.recent_jobs {
        println!(
            "  #{} {} [{}] {}/{} done, {} failed",
            job.id,
            job.tenant_user_id,
            job.status,
            job.succeeded_events + job.failed_events,
            job.total_events,
            job.failed_events
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::setup_test_db;
    use crate::meta::NewBackfillJob;

    #[tokio::test]
    async fn test_status_on_fresh_database() {
        let (db, _tmp) = setup_test_db().await;
        let mut config = Config::default();
        config.init_paths(None);

        db.create_backfill_job(&NewBackfillJob {
            tenant_user_id: "U1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let status = cmd_status(&config, &db, Some("U1"), STATUS_JOB_LIMIT)
            .await
            .unwrap();
        assert_eq!(status.chunk_count, 0);
        assert_eq!(status.events.process.pending, 0);
        assert_eq!(status.vectors.done, 0);
        assert_eq!(status.recent_jobs.len(), 1);

        let other = cmd_status(&config, &db, Some("U2"), STATUS_JOB_LIMIT)
            .await
            .unwrap();
        assert!(other.recent_jobs.is_empty());
    }
}
