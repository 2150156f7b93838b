//! Ingest and purge command implementations
//!
//! Both act on the pipeline directly, bypassing the outbox.

use super::Services;
use crate::error::{Error, Result};
use crate::ingest::{IngestRequest, IngestStats};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Read an ingest request from a JSON file
pub fn load_ingest_request(path: &Path) -> Result<IngestRequest> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))
}

/// Ingest one request synchronously
pub async fn cmd_ingest_file(services: &Services, path: &Path) -> Result<IngestStats> {
    let request = load_ingest_request(path)?;
    info!(
        tenant_user_id = %request.tenant_user_id,
        source_type = %request.source_type,
        source_key = %request.source_key,
        "Ingesting {}",
        path.display()
    );
    services.ingest_pipeline().ingest(request).await.into_result()
}

/// Print ingest stats to console
pub fn print_ingest_stats(stats: &IngestStats) {
    println!(
        "\n✓ Ingested {}/{} for {}",
        stats.source_type, stats.source_key, stats.tenant_user_id
    );
    println!("  Knowledge base: {} (source {})", stats.kb_id, stats.source_id);
    println!("  Messages: {}", stats.messages);
    println!("  Segments: {}", stats.segments);
    println!("  Chunks: {}", stats.chunks);
    println!(
        "  Vectors: {} embedded, {} unchanged, {} failed",
        stats.vectors_ok, stats.vectors_skip, stats.vectors_fail
    );
    println!("  Duration: {} ms", stats.duration_ms);
}

/// Result of a purge
#[derive(Debug, Clone, Serialize)]
pub struct PurgeStats {
    pub tenant_user_id: String,
    pub source_type: String,
    pub source_key: String,
    pub chunks_deleted: u64,
    pub disabled: bool,
}

/// Remove every chunk and vector of one source
pub async fn cmd_purge(
    services: &Services,
    tenant_user_id: &str,
    source_type: &str,
    source_key: &str,
    disable: bool,
) -> Result<PurgeStats> {
    let chunks_deleted = services
        .ingest_pipeline()
        .purge_source(tenant_user_id, source_type, source_key, disable)
        .await?;
    Ok(PurgeStats {
        tenant_user_id: tenant_user_id.trim().to_string(),
        source_type: source_type.trim().to_string(),
        source_key: source_key.trim().to_string(),
        chunks_deleted,
        disabled: disable,
    })
}

/// Print purge stats to console
pub fn print_purge_stats(stats: &PurgeStats) {
    println!(
        "✓ Purged {}/{} for {}",
        stats.source_type, stats.source_key, stats.tenant_user_id
    );
    println!("  Chunks deleted: {}", stats.chunks_deleted);
    if stats.disabled {
        println!("  Source disabled");
    }
}
