//! Outbox rows and backfill job counters

use super::{
    format_timestamp, now_timestamp, EventStatus, EventType, JobStatus, MetaDb, PublishStatus,
    StatusCounts,
};
use crate::error::{scrub_error_message, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// An ingest event row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestEvent {
    pub id: i64,
    pub event_type: String,
    pub tenant_user_id: String,
    pub backfill_job_id: Option<i64>,
    pub source_type: String,
    pub source_key: String,
    pub payload_json: String,
    pub dedup_key: String,
    pub publish_status: String,
    pub topic: Option<String>,
    pub msg_partition: Option<i64>,
    pub msg_offset: Option<i64>,
    pub published_at: Option<String>,
    pub status: String,
    pub retry_count: i64,
    pub next_retry_at: Option<String>,
    pub processing_started_at: Option<String>,
    pub claim_token: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl IngestEvent {
    pub fn get_type(&self) -> Result<EventType> {
        self.event_type.parse()
    }

    pub fn get_status(&self) -> Result<EventStatus> {
        self.status.parse()
    }

    pub fn get_publish_status(&self) -> Result<PublishStatus> {
        self.publish_status.parse()
    }

    /// Payload as a JSON object (empty object when unparsable)
    pub fn payload(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.payload_json).unwrap_or_default()
    }
}

/// A new ingest event to be written to the outbox
#[derive(Debug, Clone)]
pub struct NewIngestEvent {
    pub event_type: EventType,
    pub tenant_user_id: String,
    pub backfill_job_id: Option<i64>,
    pub source_type: String,
    pub source_key: String,
    pub payload_json: String,
    pub dedup_key: String,
    pub topic: Option<String>,
}

/// A backfill job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: i64,
    pub tenant_user_id: String,
    pub status: String,
    pub since: Option<String>,
    pub until: Option<String>,
    pub page_size: i64,
    pub max_sessions: i64,
    pub max_pages_per_session: i64,
    pub total_events: i64,
    pub published_events: i64,
    pub succeeded_events: i64,
    pub failed_events: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl BackfillJob {
    pub fn get_status(&self) -> Result<JobStatus> {
        self.status.parse()
    }
}

/// Parameters of a new backfill job
#[derive(Debug, Clone, Default)]
pub struct NewBackfillJob {
    pub tenant_user_id: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page_size: i64,
    pub max_sessions: i64,
    pub max_pages_per_session: i64,
}

/// Per-status counts for the outbox
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub publish: StatusCounts,
    pub process: StatusCounts,
}

const INSERT_EVENT_SQL: &str = r#"
    INSERT INTO ingest_events
        (event_type, tenant_user_id, backfill_job_id, source_type, source_key, payload_json,
         dedup_key, publish_status, topic, status, retry_count, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, 'pending', 0, ?, ?)
    ON CONFLICT(dedup_key) DO NOTHING
"#;

impl MetaDb {
    // ===== Ingest Event Operations =====

    /// Insert an event; `None` means an event with the same dedup key exists.
    ///
    /// A new event linked to a backfill job bumps the job's total in the
    /// same transaction.
    pub async fn insert_ingest_event(&self, event: &NewIngestEvent) -> Result<Option<i64>> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let id = insert_event(&mut tx, event, &now).await?;
        tx.commit().await?;

        if id.is_none() {
            debug!(dedup_key = %event.dedup_key, "Duplicate ingest event ignored");
        }
        Ok(id)
    }

    /// Insert a batch of events in one transaction, returning how many were new
    pub async fn insert_ingest_events(&self, events: &[NewIngestEvent]) -> Result<usize> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let mut created = 0;

        for event in events {
            if insert_event(&mut tx, event, &now).await?.is_some() {
                created += 1;
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Get an event by id
    pub async fn get_ingest_event(&self, id: i64) -> Result<Option<IngestEvent>> {
        let event = sqlx::query_as::<_, IngestEvent>("SELECT * FROM ingest_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    /// Get an event by dedup key
    pub async fn get_ingest_event_by_dedup_key(&self, dedup_key: &str) -> Result<Option<IngestEvent>> {
        let event =
            sqlx::query_as::<_, IngestEvent>("SELECT * FROM ingest_events WHERE dedup_key = ?")
                .bind(dedup_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(event)
    }

    /// Count events created for a backfill job
    pub async fn count_job_events(&self, job_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingest_events WHERE backfill_job_id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Claim a batch of publishable events for this relay.
    ///
    /// A single `UPDATE ... RETURNING` statement flips the rows to
    /// `publishing`, so concurrent claimers never receive the same row.
    /// The claim is leased: `next_retry_at` is pushed out by `lease` and a
    /// `publishing` row whose lease expired is claimable again.
    pub async fn claim_for_publish(&self, limit: usize, lease: Duration) -> Result<Vec<IngestEvent>> {
        let now = Utc::now();
        let now_ts = format_timestamp(now);
        let lease_until = format_timestamp(now + chrono::Duration::from_std(lease).unwrap_or_default());

        let mut events = sqlx::query_as::<_, IngestEvent>(
            r#"
            UPDATE ingest_events
            SET publish_status = 'publishing', next_retry_at = ?, updated_at = ?
            WHERE id IN (
                SELECT id FROM ingest_events
                WHERE (publish_status IN ('pending', 'failed')
                       AND (next_retry_at IS NULL OR next_retry_at <= ?))
                   OR (publish_status = 'publishing' AND next_retry_at <= ?)
                ORDER BY id
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(&lease_until)
        .bind(&now_ts)
        .bind(&now_ts)
        .bind(&now_ts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    /// Record a successful publish
    pub async fn mark_published(
        &self,
        id: i64,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE ingest_events
            SET publish_status = 'published', topic = ?, msg_partition = ?, msg_offset = ?,
                published_at = ?, next_retry_at = NULL, last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(topic)
        .bind(partition as i64)
        .bind(offset)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed publish and schedule the next attempt
    pub async fn mark_publish_failed(
        &self,
        id: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_events
            SET publish_status = 'failed', retry_count = retry_count + 1, next_retry_at = ?,
                last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(format_timestamp(next_retry_at))
        .bind(scrub_error_message(error))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically move an event from pending/failed to processing.
    ///
    /// Returns the claim token, or None when another worker already holds or
    /// finished it. The token must be presented to record the outcome.
    pub async fn try_mark_processing(&self, id: i64) -> Result<Option<String>> {
        let now = now_timestamp();
        let token = Uuid::new_v4().to_string();
        let result = sqlx::query(
            r#"
            UPDATE ingest_events
            SET status = 'processing', processing_started_at = ?, claim_token = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'failed')
            "#,
        )
        .bind(&now)
        .bind(&token)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok((result.rows_affected() > 0).then_some(token))
    }

    /// Mark an event processed successfully.
    ///
    /// Returns false when the claim was reset or taken over in the meantime;
    /// the row is then left alone.
    pub async fn mark_event_succeeded(&self, id: i64, claim_token: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_events
            SET status = 'succeeded', last_error = NULL, processing_started_at = NULL,
                claim_token = NULL, updated_at = ?
            WHERE id = ? AND status = 'processing' AND claim_token = ?
            "#,
        )
        .bind(now_timestamp())
        .bind(id)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark an event failed with a sanitized error.
    ///
    /// Same claim check as [`MetaDb::mark_event_succeeded`].
    pub async fn mark_event_failed(&self, id: i64, claim_token: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_events
            SET status = 'failed', retry_count = retry_count + 1, last_error = ?,
                processing_started_at = NULL, claim_token = NULL, updated_at = ?
            WHERE id = ? AND status = 'processing' AND claim_token = ?
            "#,
        )
        .bind(scrub_error_message(error))
        .bind(now_timestamp())
        .bind(id)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset events stuck in `processing` since before `started_before`.
    ///
    /// The rows go back to `pending` on both sides so the relay publishes
    /// them again and a consumer can re-claim them.
    pub async fn reset_stale_processing(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE ingest_events
            SET status = 'pending', publish_status = 'pending', next_retry_at = NULL,
                processing_started_at = NULL, claim_token = NULL,
                last_error = 'processing claim expired',
                updated_at = ?
            WHERE status = 'processing' AND processing_started_at <= ?
            "#,
        )
        .bind(&now)
        .bind(format_timestamp(started_before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Event counts by publish and processing status
    pub async fn event_stats(&self) -> Result<EventStats> {
        let publish: Vec<(String, i64)> = sqlx::query_as(
            "SELECT publish_status, COUNT(*) FROM ingest_events GROUP BY publish_status",
        )
        .fetch_all(&self.pool)
        .await?;
        let process: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM ingest_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = EventStats::default();
        for (status, n) in publish {
            match status.parse::<PublishStatus>() {
                Ok(PublishStatus::Pending) => stats.publish.pending += n,
                Ok(PublishStatus::Publishing) => stats.publish.in_flight += n,
                Ok(PublishStatus::Published) => stats.publish.done += n,
                Ok(PublishStatus::Failed) => stats.publish.failed += n,
                Err(_) => debug!(status = %status, "Ignoring unknown publish status"),
            }
        }
        for (status, n) in process {
            match status.parse::<EventStatus>() {
                Ok(EventStatus::Pending) => stats.process.pending += n,
                Ok(EventStatus::Processing) => stats.process.in_flight += n,
                Ok(EventStatus::Succeeded) => stats.process.done += n,
                Ok(EventStatus::Failed) => stats.process.failed += n,
                Err(_) => debug!(status = %status, "Ignoring unknown event status"),
            }
        }
        Ok(stats)
    }

    // ===== Backfill Job Operations =====

    /// Create a running backfill job
    pub async fn create_backfill_job(&self, job: &NewBackfillJob) -> Result<i64> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO backfill_jobs
                (tenant_user_id, status, since, until, page_size, max_sessions,
                 max_pages_per_session, created_at, updated_at)
            VALUES (?, 'running', ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.tenant_user_id)
        .bind(job.since.map(format_timestamp))
        .bind(job.until.map(format_timestamp))
        .bind(job.page_size)
        .bind(job.max_sessions)
        .bind(job.max_pages_per_session)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a backfill job by id
    pub async fn get_backfill_job(&self, id: i64) -> Result<Option<BackfillJob>> {
        let job = sqlx::query_as::<_, BackfillJob>("SELECT * FROM backfill_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Most recent jobs first, optionally for one tenant
    pub async fn list_backfill_jobs(
        &self,
        tenant_user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BackfillJob>> {
        let jobs = match tenant_user_id {
            Some(tenant) => {
                sqlx::query_as::<_, BackfillJob>(
                    "SELECT * FROM backfill_jobs WHERE tenant_user_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(tenant)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BackfillJob>(
                    "SELECT * FROM backfill_jobs ORDER BY id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(jobs)
    }

    /// Atomically add deltas to a job's counters
    pub async fn add_job_counters(
        &self,
        id: i64,
        total: i64,
        published: i64,
        succeeded: i64,
        failed: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET total_events = total_events + ?,
                published_events = published_events + ?,
                succeeded_events = succeeded_events + ?,
                failed_events = failed_events + ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total)
        .bind(published)
        .bind(succeeded)
        .bind(failed)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set a job's status explicitly
    pub async fn update_job_status(
        &self,
        id: i64,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = now_timestamp();
        let finished = (status != JobStatus::Running).then(|| now.clone());
        sqlx::query(
            r#"
            UPDATE backfill_jobs
            SET status = ?, last_error = COALESCE(?, last_error), finished_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error.map(scrub_error_message))
        .bind(finished)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Finalize a running job once every event has a terminal outcome.
    ///
    /// Returns the final status when this call performed the transition.
    pub async fn try_finalize_job(&self, id: i64) -> Result<Option<JobStatus>> {
        let now = now_timestamp();
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE backfill_jobs
            SET status = CASE WHEN failed_events > 0 THEN 'failed' ELSE 'succeeded' END,
                finished_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
              AND total_events > 0
              AND succeeded_events + failed_events >= total_events
            RETURNING status
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        status.map(|s| s.parse()).transpose()
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &NewIngestEvent,
    now: &str,
) -> Result<Option<i64>> {
    let result = sqlx::query(INSERT_EVENT_SQL)
        .bind(event.event_type.as_str())
        .bind(&event.tenant_user_id)
        .bind(event.backfill_job_id)
        .bind(&event.source_type)
        .bind(&event.source_key)
        .bind(&event.payload_json)
        .bind(&event.dedup_key)
        .bind(&event.topic)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    if let Some(job_id) = event.backfill_job_id {
        sqlx::query(
            "UPDATE backfill_jobs SET total_events = total_events + 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(Some(result.last_insert_rowid()))
}
