//! Serve and reap command implementations

use super::Services;
use crate::consumer::{IngestWorker, Reaper};
use crate::error::{Error, Result};
use crate::mq::{Consumer, Handler, MemoryBroker};
use crate::outbox::OutboxRelay;
use crate::shutdown::ShutdownRx;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Run the relay, the consumer workers and the reaper over an in-process
/// broker until `shutdown` flips.
///
/// Workers are capped at the partition count so each owns at least one
/// partition.
pub async fn cmd_serve(services: &Services, shutdown: ShutdownRx) -> Result<()> {
    let config = &services.config;
    if config.consumer.topic != config.outbox.topic {
        warn!(
            outbox_topic = %config.outbox.topic,
            consumer_topic = %config.consumer.topic,
            "Consumer topic differs from the outbox topic; events on other topics will not be consumed"
        );
    }

    let broker = Arc::new(MemoryBroker::new(config.outbox.partitions));
    let workers = config.consumer.workers.min(broker.partitions()).max(1);
    let pipeline = services.ingest_pipeline();
    let handler: Arc<dyn Handler> = Arc::new(IngestWorker::new(
        &config.consumer,
        pipeline,
        services.reader.clone(),
        services.reader.clone(),
    ));

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for member in 0..workers {
        let mut consumer = broker.consumer(&config.consumer.topic, member, workers)?;
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move { consumer.run(handler, shutdown).await });
    }

    let relay = OutboxRelay::new(&config.outbox, services.db.clone(), broker.clone());
    let relay_shutdown = shutdown.clone();
    tasks.spawn(async move { relay.run(relay_shutdown).await });

    let reaper = Reaper::new(&config.consumer, services.db.clone());
    let reaper_shutdown = shutdown.clone();
    tasks.spawn(async move { reaper.run(reaper_shutdown).await });

    info!(
        workers,
        partitions = broker.partitions(),
        topic = %config.consumer.topic,
        vector_store = services.store.backend(),
        "kbforge serving"
    );

    let mut first_error: Option<Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| Error::Other(format!("task failed: {}", e)));
        if let Err(e) = outcome.and_then(|r| r) {
            warn!(error = %e, "Background task stopped with an error");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReapReport {
    pub reset: u64,
    pub stale_after_secs: u64,
}

/// One stale-processing sweep
pub async fn cmd_reap(services: &Services) -> Result<ReapReport> {
    let reset = Reaper::new(&services.config.consumer, services.db.clone())
        .sweep()
        .await?;
    Ok(ReapReport {
        reset,
        stale_after_secs: services.config.consumer.stale_after_secs,
    })
}

pub fn print_reap_report(report: &ReapReport) {
    println!(
        "✓ Reset {} event(s) stuck in processing for more than {}s",
        report.reset, report.stale_after_secs
    );
}
