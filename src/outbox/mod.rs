//! Outbox relay
//!
//! Drains publishable ingest events from the database and publishes their
//! ids to the transport. Claiming is leased and atomic, so several relays
//! can run side by side. Every event keeps its own retry clock: a failed
//! publish is rescheduled with exponential backoff and never holds up the
//! rest of the batch.

use crate::config::OutboxConfig;
use crate::error::Result;
use crate::meta::{IngestEvent, MetaDb};
use crate::mq::{Message, Publisher};
use crate::shutdown::{is_requested, sleep_or_stop, ShutdownRx};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before retrying an event whose topic cannot be resolved
const EMPTY_TOPIC_RETRY: Duration = Duration::from_secs(300);

/// Exponential backoff: `base * 2^n`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay after `retries` earlier failures
    pub fn delay(&self, retries: i64) -> Duration {
        let exp = retries.clamp(0, 32) as u32;
        self.base
            .checked_mul(2u32.saturating_pow(exp))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// When to retry an event that has failed `retries` times before now
    pub fn next_retry_at(&self, now: DateTime<Utc>, retries: i64) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.delay(retries)).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }
}

/// Summary of one relay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayPass {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct OutboxRelay {
    db: MetaDb,
    publisher: Arc<dyn Publisher>,
    topic: String,
    batch_size: usize,
    poll_interval: Duration,
    lease: Duration,
    backoff: Backoff,
}

impl OutboxRelay {
    pub fn new(config: &OutboxConfig, db: MetaDb, publisher: Arc<dyn Publisher>) -> Self {
        let poll_interval = match config.poll_interval() {
            d if d.is_zero() => Duration::from_millis(500),
            d => d,
        };
        Self {
            db,
            publisher,
            topic: config.topic.trim().to_string(),
            batch_size: if config.batch_size == 0 { 200 } else { config.batch_size },
            poll_interval,
            lease: Duration::from_secs(config.claim_lease_secs.max(1)),
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            ),
        }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Poll until shutdown.
    ///
    /// Claim errors are logged and retried with a doubling delay; a
    /// successful claim resets it.
    pub async fn run(&self, mut shutdown: ShutdownRx) -> Result<()> {
        info!(topic = %self.topic, batch = self.batch_size, "Outbox relay started");
        let mut error_delay = self.poll_interval;

        while !is_requested(&shutdown) {
            let wait = match self.run_once().await {
                Ok(pass) => {
                    error_delay = self.poll_interval;
                    if pass.claimed > 0 {
                        continue;
                    }
                    self.poll_interval
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = error_delay.as_millis() as u64, "Outbox claim failed");
                    let wait = error_delay;
                    error_delay = (error_delay * 2).min(self.backoff.max);
                    wait
                }
            };

            if sleep_or_stop(wait, &mut shutdown).await {
                break;
            }
        }

        info!("Outbox relay stopped");
        Ok(())
    }

    /// Claim one batch and publish it
    pub async fn run_once(&self) -> Result<RelayPass> {
        let events = self.db.claim_for_publish(self.batch_size, self.lease).await?;
        let mut pass = RelayPass {
            claimed: events.len(),
            ..Default::default()
        };
        if events.is_empty() {
            return Ok(pass);
        }
        debug!(count = events.len(), "Claimed events for publish");

        for event in &events {
            if self.publish_event(event).await {
                pass.published += 1;
            } else {
                pass.failed += 1;
            }
        }

        debug!(
            published = pass.published,
            failed = pass.failed,
            "Relay pass finished"
        );
        Ok(pass)
    }

    fn resolve_topic(&self, event: &IngestEvent) -> Option<String> {
        if !self.topic.is_empty() {
            return Some(self.topic.clone());
        }
        event
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Returns whether the event was published
    async fn publish_event(&self, event: &IngestEvent) -> bool {
        let now = Utc::now();

        let Some(topic) = self.resolve_topic(event) else {
            let retry_at = now + chrono::Duration::from_std(EMPTY_TOPIC_RETRY).unwrap_or_default();
            self.record_failure(event, retry_at, "topic is empty").await;
            return false;
        };

        let id = event.id.to_string();
        let key = if event.dedup_key.is_empty() {
            id.clone()
        } else {
            event.dedup_key.clone()
        };
        let message = Message::new(&topic, key, id.clone())
            .with_header("event_id", id)
            .with_header("event_type", event.event_type.clone())
            .with_header("tenant_user_id", event.tenant_user_id.clone())
            .with_header("source_type", event.source_type.clone())
            .with_header("source_key", event.source_key.clone())
            .with_header("dedup_key", event.dedup_key.clone());

        let result = match self.publisher.publish(message).await {
            Ok(r) => r,
            Err(e) => {
                let retry_at = self.backoff.next_retry_at(now, event.retry_count);
                self.record_failure(event, retry_at, &e.to_string()).await;
                return false;
            }
        };

        // Already on the wire: a failure past this point means a duplicate
        // delivery later, which the consumer tolerates.
        if let Err(e) = self
            .db
            .mark_published(event.id, &topic, result.partition, result.offset)
            .await
        {
            warn!(event_id = event.id, error = %e, "Published but failed to record it");
            return false;
        }

        if let Some(job_id) = event.backfill_job_id {
            if let Err(e) = self.db.add_job_counters(job_id, 0, 1, 0, 0).await {
                warn!(event_id = event.id, job_id, error = %e, "Failed to bump job published counter");
            }
        }

        debug!(
            event_id = event.id,
            topic = %topic,
            partition = result.partition,
            offset = result.offset,
            "Event published"
        );
        true
    }

    async fn record_failure(&self, event: &IngestEvent, retry_at: DateTime<Utc>, error: &str) {
        warn!(
            event_id = event.id,
            retry_count = event.retry_count + 1,
            retry_at = %retry_at,
            error = %crate::error::scrub_error_message(error),
            "Publish failed"
        );
        if let Err(e) = self.db.mark_publish_failed(event.id, retry_at, error).await {
            warn!(event_id = event.id, error = %e, "Failed to record publish failure");
        }
    }
}

#[cfg(test)]
mod tests;
