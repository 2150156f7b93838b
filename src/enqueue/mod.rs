//! Producer side of the outbox
//!
//! Producers never talk to the transport. They write an ingest event row
//! whose dedup key makes re-enqueueing the same logical work a no-op; the
//! relay takes it from there.

mod backfill;

pub use backfill::{BackfillReport, BackfillRequest};

use crate::error::{Error, Result};
use crate::meta::{EventType, MetaDb, NewIngestEvent};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Largest chat page a producer may request
pub const MAX_PAGE_SIZE: usize = 200;

/// Page size for incremental chat events when none is given
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Payload of a `chat_messages_page` event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPagePayload {
    pub session_uuid: String,
    pub session_type: i64,
    pub session_name: String,
    pub target_id: String,
    pub page: i64,
    pub page_size: i64,
    pub since: String,
    pub until: String,
}

/// Parameters of an incremental chat page event
#[derive(Debug, Clone, Default)]
pub struct ChatPageRequest {
    pub tenant_user_id: String,
    pub session_uuid: String,
    pub session_type: i64,
    pub session_name: String,
    /// Falls back to `source_key`
    pub target_id: String,
    pub page: usize,
    pub page_size: usize,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub source_type: String,
    /// Falls back to `target_id`
    pub source_key: String,
    /// Defaults to the current time in nanoseconds, so every call is new work
    pub dedup_extra: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(i64),
    Duplicate,
}

impl EnqueueOutcome {
    pub fn event_id(&self) -> Option<i64> {
        match self {
            EnqueueOutcome::Created(id) => Some(*id),
            EnqueueOutcome::Duplicate => None,
        }
    }
}

/// `inc_` + blake3 of the event identity fields
pub fn incremental_dedup_key(
    tenant_user_id: &str,
    event_type: EventType,
    source_type: &str,
    source_key: &str,
    dedup_extra: &str,
) -> String {
    let raw = [
        tenant_user_id.trim(),
        event_type.as_str(),
        source_type.trim(),
        source_key.trim(),
        dedup_extra.trim(),
    ]
    .join("|");
    format!("inc_{}", blake3::hash(raw.as_bytes()).to_hex())
}

/// Parse a user-supplied time: RFC 3339, `YYYY-MM-DD HH:MM:SS` or
/// `YYYY-MM-DD` (the last two read as UTC). Blank input is `None`.
pub fn parse_time_arg(raw: &str) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(t.and_utc()));
    }
    if let Some(t) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Some(t.and_utc()));
    }
    Err(Error::validation(format!("invalid time: {}", raw)))
}

pub(crate) fn format_time_arg(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn unix_minute() -> String {
    (Utc::now().timestamp() / 60).to_string()
}

fn unix_nanos() -> String {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000)
        .to_string()
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    match value.trim() {
        "" => Err(Error::validation(format!("missing {}", field))),
        v => Ok(v),
    }
}

/// Writes ingest events to the outbox
#[derive(Clone)]
pub struct EventProducer {
    db: MetaDb,
    topic: Option<String>,
}

impl EventProducer {
    pub fn new(db: MetaDb) -> Self {
        Self { db, topic: None }
    }

    /// Record `topic` on new events, for relays without a default topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        self.topic = Some(topic).filter(|t| !t.trim().is_empty());
        self
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    /// Write one event; an existing dedup key is a silent success
    pub async fn enqueue_event(
        &self,
        event_type: EventType,
        tenant_user_id: &str,
        source_type: &str,
        source_key: &str,
        payload: &serde_json::Value,
        dedup_extra: &str,
    ) -> Result<EnqueueOutcome> {
        let tenant = required(tenant_user_id, "tenant_user_id")?;
        let source_type = required(source_type, "source_type")?;
        let source_key = required(source_key, "source_key")?;

        let dedup_key =
            incremental_dedup_key(tenant, event_type, source_type, source_key, dedup_extra);
        let event = NewIngestEvent {
            event_type,
            tenant_user_id: tenant.to_string(),
            backfill_job_id: None,
            source_type: source_type.to_string(),
            source_key: source_key.to_string(),
            payload_json: serde_json::to_string(payload)?,
            dedup_key,
            topic: self.topic.clone(),
        };

        match self.db.insert_ingest_event(&event).await? {
            Some(id) => {
                debug!(
                    event_id = id,
                    event_type = %event_type,
                    tenant_user_id = %tenant,
                    source_key = %source_key,
                    "Event enqueued"
                );
                Ok(EnqueueOutcome::Created(id))
            }
            None => {
                debug!(dedup_key = %event.dedup_key, "Duplicate event ignored");
                Ok(EnqueueOutcome::Duplicate)
            }
        }
    }

    pub async fn enqueue_self_profile(&self, tenant_user_id: &str) -> Result<EnqueueOutcome> {
        let tenant = required(tenant_user_id, "tenant_user_id")?;
        self.enqueue_event(
            EventType::SelfProfile,
            tenant,
            "self_profile",
            tenant,
            &serde_json::json!({ "tenant_user_id": tenant }),
            &unix_minute(),
        )
        .await
    }

    pub async fn enqueue_contact_profile(
        &self,
        tenant_user_id: &str,
        contact_id: &str,
    ) -> Result<EnqueueOutcome> {
        let contact_id = required(contact_id, "contact_id")?;
        self.enqueue_event(
            EventType::ContactProfile,
            tenant_user_id,
            "contact_profile",
            contact_id,
            &serde_json::json!({ "contact_id": contact_id }),
            &unix_minute(),
        )
        .await
    }

    pub async fn enqueue_group_profile(
        &self,
        tenant_user_id: &str,
        group_id: &str,
    ) -> Result<EnqueueOutcome> {
        let group_id = required(group_id, "group_id")?;
        self.enqueue_event(
            EventType::GroupProfile,
            tenant_user_id,
            "group_profile",
            group_id,
            &serde_json::json!({ "group_id": group_id }),
            &unix_minute(),
        )
        .await
    }

    pub async fn enqueue_chat_messages_page(&self, req: &ChatPageRequest) -> Result<EnqueueOutcome> {
        required(&req.tenant_user_id, "tenant_user_id")?;
        let session_uuid = required(&req.session_uuid, "session_uuid")?;
        let target_id = match req.target_id.trim() {
            "" => required(&req.source_key, "target_id")?,
            t => t,
        };
        let source_type = required(&req.source_type, "source_type")?;
        let source_key = match req.source_key.trim() {
            "" => target_id,
            k => k,
        };

        let page_size = match req.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let payload = ChatPagePayload {
            session_uuid: session_uuid.to_string(),
            session_type: req.session_type,
            session_name: req.session_name.trim().to_string(),
            target_id: target_id.to_string(),
            page: req.page.max(1) as i64,
            page_size: page_size as i64,
            since: format_time_arg(req.since),
            until: format_time_arg(req.until),
        };

        let dedup_extra = match req.dedup_extra.trim() {
            "" => unix_nanos(),
            extra => extra.to_string(),
        };

        self.enqueue_event(
            EventType::ChatMessagesPage,
            &req.tenant_user_id,
            source_type,
            source_key,
            &serde_json::to_value(&payload)?,
            &dedup_extra,
        )
        .await
    }
}

#[cfg(test)]
mod tests;
