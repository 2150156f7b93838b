//! Ingest consumer worker
//!
//! Transport messages only carry an event id. The worker reloads the event
//! row, claims it, dispatches on its type and records the outcome on the
//! event and its backfill job. Business failures are recorded, never
//! redelivered: the handler acknowledges every message.

mod reaper;

pub use reaper::Reaper;

use crate::config::ConsumerConfig;
use crate::enqueue::{ChatPagePayload, MAX_PAGE_SIZE};
use crate::error::{scrub_error_message, Error, Result};
use crate::ingest::{IngestPipeline, IngestRequest};
use crate::meta::{EventStatus, EventType, IngestEvent, MetaDb};
use crate::mq::{Handler, Message};
use crate::reader::{ChatMessage, ChatReader, ChatSession, ProfileKind, ProfileRead, ProfileReader, SessionKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct IngestWorker {
    db: MetaDb,
    pipeline: Arc<IngestPipeline>,
    chats: Arc<dyn ChatReader>,
    profiles: Arc<dyn ProfileReader>,
    page_size: usize,
    max_pages: usize,
}

impl IngestWorker {
    pub fn new(
        config: &ConsumerConfig,
        pipeline: Arc<IngestPipeline>,
        chats: Arc<dyn ChatReader>,
        profiles: Arc<dyn ProfileReader>,
    ) -> Self {
        Self {
            db: pipeline.db().clone(),
            pipeline,
            chats,
            profiles,
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            max_pages: config.max_pages.max(1),
        }
    }

    /// Process the event with this id, if it still needs processing
    pub async fn handle_event_id(&self, id: i64) -> Result<()> {
        let Some(event) = self.db.get_ingest_event(id).await? else {
            debug!(event_id = id, "Event not found, ignoring");
            return Ok(());
        };
        if event.get_status()? == EventStatus::Succeeded {
            debug!(event_id = id, "Event already succeeded");
            return Ok(());
        }
        let Some(claim) = self.db.try_mark_processing(id).await? else {
            debug!(event_id = id, "Event claimed elsewhere");
            return Ok(());
        };

        match self.process_event(&event).await {
            Ok(()) => {
                if !self.db.mark_event_succeeded(id, &claim).await? {
                    warn!(event_id = id, "Claim expired before the event finished; outcome dropped");
                    return Ok(());
                }
                self.record_job_outcome(&event, true).await;
                debug!(event_id = id, event_type = %event.event_type, "Event succeeded");
            }
            Err(e) => {
                let message = scrub_error_message(&e.to_string());
                match self.db.mark_event_failed(id, &claim, &message).await {
                    Ok(true) => self.record_job_outcome(&event, false).await,
                    Ok(false) => {
                        warn!(event_id = id, "Claim expired before the event finished; outcome dropped")
                    }
                    Err(db_err) => {
                        warn!(event_id = id, error = %db_err, "Failed to record event failure")
                    }
                }
                warn!(
                    event_id = id,
                    event_type = %event.event_type,
                    tenant_user_id = %event.tenant_user_id,
                    source_type = %event.source_type,
                    source_key = %event.source_key,
                    error = %message,
                    "Event failed"
                );
            }
        }
        Ok(())
    }

    async fn record_job_outcome(&self, event: &IngestEvent, succeeded: bool) {
        let Some(job_id) = event.backfill_job_id else {
            return;
        };

        let (ok, failed) = if succeeded { (1, 0) } else { (0, 1) };
        if let Err(e) = self.db.add_job_counters(job_id, 0, 0, ok, failed).await {
            warn!(job_id, error = %e, "Failed to update job counters");
            return;
        }
        match self.db.try_finalize_job(job_id).await {
            Ok(Some(status)) => info!(job_id, status = %status, "Backfill job finished"),
            Ok(None) => {}
            Err(e) => warn!(job_id, error = %e, "Failed to finalize job"),
        }
    }

    /// Dispatch on the event type
    pub async fn process_event(&self, event: &IngestEvent) -> Result<()> {
        let tenant = event.tenant_user_id.trim();
        let source_key = event.source_key.trim();
        let payload = event.payload();
        let payload_id = |field: &str| {
            payload
                .get(field)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(source_key)
                .to_string()
        };

        match event.get_type()? {
            EventType::SelfProfile => {
                let key = if source_key.is_empty() { tenant } else { source_key };
                self.ingest_profile(tenant, ProfileKind::SelfProfile, "self_profile", key)
                    .await
            }
            EventType::ContactProfile => {
                let contact_id = payload_id("contact_id");
                if contact_id.is_empty() {
                    return Err(Error::validation("missing contact_id"));
                }
                self.ingest_profile(tenant, ProfileKind::Contact, "contact_profile", &contact_id)
                    .await
            }
            EventType::GroupProfile => {
                let group_id = payload_id("group_id");
                if group_id.is_empty() {
                    return Err(Error::validation("missing group_id"));
                }
                self.refresh_group(tenant, &group_id).await
            }
            EventType::ChatMessagesPage => self.ingest_chat_page(event).await,
        }
    }

    async fn ingest_profile(
        &self,
        tenant: &str,
        kind: ProfileKind,
        source_type: &str,
        id: &str,
    ) -> Result<()> {
        match self.profiles.read_profile(tenant, kind, id).await {
            ProfileRead::Content(doc) => {
                let request = IngestRequest::document(tenant, source_type, id, doc);
                self.pipeline.ingest(request).await.into_result()?;
                Ok(())
            }
            ProfileRead::Empty => {
                debug!(tenant_user_id = %tenant, kind = %kind, id, "Profile empty, nothing to ingest");
                Ok(())
            }
            ProfileRead::Failed(e) => Err(Error::Reader(e)),
        }
    }

    /// A group profile replaces whatever was indexed for it; an empty profile
    /// removes the group from the index.
    async fn refresh_group(&self, tenant: &str, group_id: &str) -> Result<()> {
        match self.profiles.read_profile(tenant, ProfileKind::Group, group_id).await {
            ProfileRead::Empty => {
                self.pipeline
                    .purge_source(tenant, "group_profile", group_id, true)
                    .await?;
                Ok(())
            }
            ProfileRead::Content(doc) => {
                self.pipeline
                    .purge_source(tenant, "group_profile", group_id, false)
                    .await?;
                let request = IngestRequest::document(tenant, "group_profile", group_id, doc);
                self.pipeline.ingest(request).await.into_result()?;
                Ok(())
            }
            ProfileRead::Failed(e) => Err(Error::Reader(e)),
        }
    }

    async fn ingest_chat_page(&self, event: &IngestEvent) -> Result<()> {
        let payload: ChatPagePayload = serde_json::from_str(&event.payload_json)?;
        let tenant = event.tenant_user_id.trim();

        let session_uuid = payload.session_uuid.trim();
        if session_uuid.is_empty() {
            return Err(Error::validation("missing session_uuid"));
        }
        let target_id = match payload.target_id.trim() {
            "" => event.source_key.trim(),
            t => t,
        };
        if target_id.is_empty() {
            return Err(Error::validation("missing target_id"));
        }

        let page = payload.page.max(1) as usize;
        let page_size = match payload.page_size {
            n if n <= 0 => self.page_size,
            n => (n as usize).min(MAX_PAGE_SIZE),
        };
        let since = parse_time(&payload.since);
        let until = parse_time(&payload.until);

        let kind = SessionKind::from_code(payload.session_type).unwrap_or(
            if event.source_type.trim() == SessionKind::Group.source_type() {
                SessionKind::Group
            } else {
                SessionKind::Private
            },
        );
        let session = ChatSession {
            session_uuid: session_uuid.to_string(),
            target_id: target_id.to_string(),
            kind,
            name: payload.session_name.trim().to_string(),
        };

        let messages = if event.backfill_job_id.is_some() {
            let page_messages = self
                .chats
                .read_messages(tenant, &session, page, page_size, since)
                .await?;
            within_until(page_messages, until)
        } else {
            self.read_recent(tenant, &session, page_size, since, until)
                .await?
        };

        if messages.is_empty() {
            debug!(event_id = event.id, session_uuid, "No messages to ingest");
            return Ok(());
        }

        let request = IngestRequest {
            tenant_user_id: tenant.to_string(),
            source_type: event.source_type.trim().to_string(),
            source_key: target_id.to_string(),
            session_uuid: session.session_uuid.clone(),
            session_type: payload.session_type,
            session_name: session.name.clone(),
            messages,
            documents: Vec::new(),
        };
        self.pipeline.ingest(request).await.into_result()?;
        Ok(())
    }

    /// Page back from the newest message until the pages run out, the
    /// `since` boundary is crossed, or the page cap is hit.
    async fn read_recent(
        &self,
        tenant: &str,
        session: &ChatSession,
        page_size: usize,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();

        for page in 1..=self.max_pages {
            let raw = self.chats.read_page(tenant, session, page, page_size).await?;
            let Some(oldest) = raw.last().map(|m| m.created_at) else {
                break;
            };

            let fresh = raw
                .into_iter()
                .filter(|m| !m.content.trim().is_empty())
                .filter(|m| since.map_or(true, |s| m.created_at > s));
            messages.extend(within_until(fresh.collect(), until));

            if since.is_some_and(|s| oldest <= s) {
                break;
            }
        }
        Ok(messages)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn within_until(messages: Vec<ChatMessage>, until: Option<DateTime<Utc>>) -> Vec<ChatMessage> {
    match until {
        Some(u) => messages.into_iter().filter(|m| m.created_at <= u).collect(),
        None => messages,
    }
}

#[async_trait]
impl Handler for IngestWorker {
    async fn handle(&self, message: &Message) -> Result<()> {
        let value = message.value_str();
        match value.trim().parse::<i64>() {
            Ok(id) if id > 0 => self.handle_event_id(id).await,
            _ => {
                warn!(topic = %message.topic, value = %value, "Ignoring message without a valid event id");
                Ok(())
            }
        }
    }
}
