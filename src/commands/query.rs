//! Query command implementation

use super::{preview, Services};
use crate::error::Result;
use crate::retrieve::{RetrieveRequest, RetrieveResult};
use tracing::info;

/// Run one retrieval against the tenant's knowledge base
pub async fn cmd_query(services: &Services, request: RetrieveRequest) -> Result<RetrieveResult> {
    info!(tenant_user_id = %request.tenant_user_id, "Querying: {}", request.question);
    services.retrieve_pipeline().retrieve(request).await
}

/// Print query results to console
pub fn print_query_results(result: &RetrieveResult) {
    println!("\n🔍 Query: {}", result.question);
    println!(
        "   id {} | kb {} | {} of {} hits | {} ms\n",
        result.query_id,
        result.kb_id,
        result.returned_count,
        result.total_hits,
        result.timings.total_ms
    );

    if result.is_empty {
        println!("{}", result.message);
        return;
    }

    for (i, chunk) in result.chunks.iter().enumerate() {
        println!(
            "{}. [score: {:.3}] {}/{} (chunk {})",
            i + 1,
            chunk.score,
            chunk.source_type,
            chunk.source_key,
            chunk.chunk_id
        );
        println!("   {}\n", preview(&chunk.content, 200));
    }
}
