//! Enqueue, backfill and job command implementations

use super::Services;
use crate::enqueue::{parse_time_arg, BackfillReport, BackfillRequest, ChatPageRequest, EnqueueOutcome};
use crate::error::{Error, Result};
use crate::meta::BackfillJob;
use crate::reader::SessionKind;
use serde::Serialize;

/// One incremental unit of work to record
#[derive(Debug, Clone)]
pub enum EnqueueTarget {
    SelfProfile,
    Contact { contact_id: String },
    Group { group_id: String },
    ChatPage(ChatPageArgs),
}

/// Chat page arguments as given on the command line
#[derive(Debug, Clone, Default)]
pub struct ChatPageArgs {
    pub session_uuid: String,
    pub session_type: i64,
    pub session_name: String,
    pub target_id: String,
    pub page: usize,
    pub page_size: usize,
    pub since: Option<String>,
    pub until: Option<String>,
    /// Derived from `session_type` when absent
    pub source_type: Option<String>,
}

impl ChatPageArgs {
    fn into_request(self, tenant_user_id: &str) -> Result<ChatPageRequest> {
        let source_type = match self.source_type {
            Some(st) => st,
            None => SessionKind::from_code(self.session_type)
                .map(|k| k.source_type().to_string())
                .ok_or_else(|| {
                    Error::validation(format!(
                        "unknown session_type {}; pass --source-type",
                        self.session_type
                    ))
                })?,
        };
        Ok(ChatPageRequest {
            tenant_user_id: tenant_user_id.to_string(),
            session_uuid: self.session_uuid,
            session_type: self.session_type,
            session_name: self.session_name,
            target_id: self.target_id,
            page: self.page,
            page_size: self.page_size,
            since: parse_time_arg(self.since.as_deref().unwrap_or_default())?,
            until: parse_time_arg(self.until.as_deref().unwrap_or_default())?,
            source_type,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReport {
    pub created: bool,
    pub event_id: Option<i64>,
}

impl From<EnqueueOutcome> for EnqueueReport {
    fn from(outcome: EnqueueOutcome) -> Self {
        Self {
            created: outcome.event_id().is_some(),
            event_id: outcome.event_id(),
        }
    }
}

/// Record one event in the outbox
pub async fn cmd_enqueue(
    services: &Services,
    tenant_user_id: &str,
    target: EnqueueTarget,
) -> Result<EnqueueReport> {
    let producer = services.producer();
    let outcome = match target {
        EnqueueTarget::SelfProfile => producer.enqueue_self_profile(tenant_user_id).await?,
        EnqueueTarget::Contact { contact_id } => {
            producer
                .enqueue_contact_profile(tenant_user_id, &contact_id)
                .await?
        }
        EnqueueTarget::Group { group_id } => {
            producer
                .enqueue_group_profile(tenant_user_id, &group_id)
                .await?
        }
        EnqueueTarget::ChatPage(args) => {
            producer
                .enqueue_chat_messages_page(&args.into_request(tenant_user_id)?)
                .await?
        }
    };
    Ok(outcome.into())
}

pub fn print_enqueue_report(report: &EnqueueReport) {
    match report.event_id {
        Some(id) => println!("✓ Enqueued event {}", id),
        None => println!("✓ Already enqueued (duplicate)"),
    }
}

/// Scan the reader data and schedule a backfill job
pub async fn cmd_backfill(services: &Services, request: BackfillRequest) -> Result<BackfillReport> {
    let reader = services.reader.as_ref();
    services
        .producer()
        .schedule_backfill(reader, reader, &request)
        .await
}

pub fn print_backfill_report(report: &BackfillReport) {
    println!(
        "\n✓ Backfill job {} scheduled for {}",
        report.job_id, report.tenant_user_id
    );
    println!("  Sessions: {}", report.sessions);
    println!("  Pages: {}", report.pages);
    println!("  Messages: {}", report.messages);
    println!("  Events: {}", report.total_events);
    println!("  Duration: {} ms", report.duration_ms);
}

/// Look up one backfill job
pub async fn cmd_job(services: &Services, job_id: i64) -> Result<BackfillJob> {
    services
        .db
        .get_backfill_job(job_id)
        .await?
        .ok_or_else(|| Error::validation(format!("backfill job {} not found", job_id)))
}

pub fn print_job(job: &BackfillJob) {
    println!("\n📦 Backfill job {} [{}]", job.id, job.status);
    println!("  Tenant: {}", job.tenant_user_id);
    println!(
        "  Window: {} .. {}",
        job.since.as_deref().unwrap_or("-"),
        job.until.as_deref().unwrap_or("-")
    );
    println!(
        "  Events: {} total, {} published, {} succeeded, {} failed",
        job.total_events, job.published_events, job.succeeded_events, job.failed_events
    );
    println!("  Created: {}", job.created_at);
    if let Some(finished) = &job.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(error) = &job.last_error {
        println!("  Last error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_page_source_type_from_session_type() {
        let req = ChatPageArgs {
            session_uuid: "S1".to_string(),
            session_type: 2,
            target_id: "G1".to_string(),
            since: Some("2024-05-01".to_string()),
            ..Default::default()
        }
        .into_request("U1")
        .unwrap();
        assert_eq!(req.source_type, "chat_group");
        assert_eq!(req.tenant_user_id, "U1");
        assert!(req.since.is_some());
        assert!(req.until.is_none());

        let explicit = ChatPageArgs {
            session_type: 9,
            source_type: Some("chat_private".to_string()),
            ..Default::default()
        }
        .into_request("U1")
        .unwrap();
        assert_eq!(explicit.source_type, "chat_private");

        assert!(ChatPageArgs {
            session_type: 9,
            ..Default::default()
        }
        .into_request("U1")
        .unwrap_err()
        .is_validation());
    }
}
