//! Backfill scheduling: one job, one event per unit of historical work

use super::{format_time_arg, parse_time_arg, ChatPagePayload, EventProducer, MAX_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::meta::{EventType, JobStatus, NewBackfillJob, NewIngestEvent};
use crate::reader::{ChatReader, ProfileKind, ProfileReader};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillRequest {
    pub tenant_user_id: String,
    /// Lower bound (exclusive) on message time
    pub since: String,
    /// Upper bound (inclusive) on message time
    pub until: String,
    /// Messages per page; 0 means the maximum
    pub page_size: usize,
    /// 0 means every session
    pub max_sessions: usize,
    /// 0 means every page
    pub max_pages_per_session: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub job_id: i64,
    pub tenant_user_id: String,
    pub sessions: usize,
    pub pages: usize,
    pub messages: usize,
    pub total_events: usize,
    pub duration_ms: u64,
}

/// An event to schedule, before the job id is known
struct Planned {
    event_type: EventType,
    source_type: String,
    source_key: String,
    dedup_extra: String,
    payload: serde_json::Value,
}

impl EventProducer {
    /// Scan the readers and schedule a backfill job.
    ///
    /// Events are written in a single transaction and each one bumps the
    /// job total as it lands, so the job can only finalize once every
    /// event is counted. A job with nothing to do finishes immediately.
    pub async fn schedule_backfill(
        &self,
        chats: &dyn ChatReader,
        profiles: &dyn ProfileReader,
        req: &BackfillRequest,
    ) -> Result<BackfillReport> {
        let start = Instant::now();
        let tenant = req.tenant_user_id.trim();
        if tenant.is_empty() {
            return Err(Error::validation("missing tenant_user_id"));
        }
        let since = parse_time_arg(&req.since)
            .map_err(|_| Error::validation("invalid since"))?;
        let until = parse_time_arg(&req.until)
            .map_err(|_| Error::validation("invalid until"))?;
        let page_size = match req.page_size {
            0 => MAX_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };

        let mut report = BackfillReport {
            tenant_user_id: tenant.to_string(),
            ..Default::default()
        };
        let mut planned = vec![Planned {
            event_type: EventType::SelfProfile,
            source_type: "self_profile".to_string(),
            source_key: tenant.to_string(),
            dedup_extra: "0".to_string(),
            payload: serde_json::json!({ "tenant_user_id": tenant }),
        }];

        for (kind, event_type, source_type, field) in [
            (ProfileKind::Contact, EventType::ContactProfile, "contact_profile", "contact_id"),
            (ProfileKind::Group, EventType::GroupProfile, "group_profile", "group_id"),
        ] {
            let ids = match profiles.list_ids(tenant, kind).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(tenant_user_id = %tenant, kind = %kind, error = %e, "Backfill profile listing failed");
                    continue;
                }
            };
            for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
                planned.push(Planned {
                    event_type,
                    source_type: source_type.to_string(),
                    source_key: id.to_string(),
                    dedup_extra: "0".to_string(),
                    payload: serde_json::json!({ field: id }),
                });
            }
        }

        let mut sessions = chats.list_sessions(tenant).await?;
        if req.max_sessions > 0 {
            sessions.truncate(req.max_sessions);
        }

        for session in &sessions {
            report.sessions += 1;
            let source_type = session.kind.source_type();
            let mut pages = 0;

            for page in 1.. {
                if req.max_pages_per_session > 0 && pages >= req.max_pages_per_session {
                    break;
                }
                let messages = match chats
                    .read_messages(tenant, session, page, page_size, since)
                    .await
                {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(session_uuid = %session.session_uuid, page, error = %e, "Backfill page read failed");
                        break;
                    }
                };
                if messages.is_empty() {
                    break;
                }
                // Pages run newest first, so older pages may still fall inside the window
                let count = messages
                    .iter()
                    .filter(|m| until.map_or(true, |u| m.created_at <= u))
                    .count();
                if count == 0 {
                    continue;
                }

                pages += 1;
                report.messages += count;

                let payload = ChatPagePayload {
                    session_uuid: session.session_uuid.clone(),
                    session_type: session.kind.code(),
                    session_name: session.name.clone(),
                    target_id: session.target_id.clone(),
                    page: page as i64,
                    page_size: page_size as i64,
                    since: format_time_arg(since),
                    until: format_time_arg(until),
                };
                planned.push(Planned {
                    event_type: EventType::ChatMessagesPage,
                    source_type: source_type.to_string(),
                    source_key: session.target_id.clone(),
                    dedup_extra: page.to_string(),
                    payload: serde_json::to_value(&payload)?,
                });
            }

            report.pages += pages;
            info!(
                tenant_user_id = %tenant,
                session_uuid = %session.session_uuid,
                source_type,
                source_key = %session.target_id,
                pages,
                "Backfill session scheduled"
            );
        }

        let job_id = self
            .db
            .create_backfill_job(&NewBackfillJob {
                tenant_user_id: tenant.to_string(),
                since,
                until,
                page_size: page_size as i64,
                max_sessions: req.max_sessions as i64,
                max_pages_per_session: req.max_pages_per_session as i64,
            })
            .await?;
        report.job_id = job_id;

        let events = planned
            .into_iter()
            .map(|p| {
                Ok(NewIngestEvent {
                    dedup_key: format!(
                        "bf_{}_{}_{}_{}_{}",
                        job_id, p.event_type, p.source_type, p.source_key, p.dedup_extra
                    ),
                    event_type: p.event_type,
                    tenant_user_id: tenant.to_string(),
                    backfill_job_id: Some(job_id),
                    source_type: p.source_type,
                    source_key: p.source_key,
                    payload_json: serde_json::to_string(&p.payload)?,
                    topic: self.topic.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        report.total_events = match self.db.insert_ingest_events(&events).await {
            Ok(n) => n,
            Err(e) => {
                let message = e.to_string();
                self.db
                    .update_job_status(job_id, JobStatus::Failed, Some(&message))
                    .await?;
                return Err(e);
            }
        };
        if report.total_events == 0 {
            self.db
                .update_job_status(job_id, JobStatus::Succeeded, None)
                .await?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            tenant_user_id = %tenant,
            job_id,
            events = report.total_events,
            sessions = report.sessions,
            pages = report.pages,
            messages = report.messages,
            duration_ms = report.duration_ms,
            "Backfill scheduled"
        );
        Ok(report)
    }
}
