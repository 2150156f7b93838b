use super::*;
use crate::meta::tests::setup_test_db;
use crate::meta::{EventStatus, JobStatus, PublishStatus};
use crate::reader::{ChatMessage, ChatSession, MemoryReader, ProfileKind, ProfileRead, SessionKind};
use chrono::{Duration, TimeZone};

fn message(id: usize, at: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        session_id: "S1".to_string(),
        sender_id: "U2".to_string(),
        sender_name: "Bob".to_string(),
        content: format!("message {}", id),
        created_at: at,
    }
}

async fn reader_with_history(t0: DateTime<Utc>) -> MemoryReader {
    let reader = MemoryReader::new();
    reader
        .add_session(
            "U1",
            ChatSession {
                session_uuid: "S1".to_string(),
                target_id: "U2".to_string(),
                kind: SessionKind::Private,
                name: "Bob".to_string(),
            },
        )
        .await;
    let messages = (0..5).map(|i| message(i, t0 + Duration::minutes(i as i64))).collect();
    reader.add_messages("U1", "S1", messages).await;
    reader
        .set_profile("U1", ProfileKind::Contact, "U2", ProfileRead::from_text("Bob, a sailor"))
        .await;
    reader
        .set_profile("U1", ProfileKind::Group, "G1", ProfileRead::from_text("Harbour crew"))
        .await;
    reader
}

#[test]
fn test_incremental_dedup_key() {
    let a = incremental_dedup_key("U1", EventType::ContactProfile, "contact_profile", "U2", "7");
    let b = incremental_dedup_key(" U1 ", EventType::ContactProfile, "contact_profile", "U2 ", "7");
    let c = incremental_dedup_key("U1", EventType::ContactProfile, "contact_profile", "U2", "8");

    assert!(a.starts_with("inc_"));
    assert_eq!(a.len(), 4 + 64);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_parse_time_arg() {
    let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
    assert_eq!(parse_time_arg("2024-05-01T08:30:00Z").unwrap(), Some(expected));
    assert_eq!(parse_time_arg("2024-05-01T10:30:00+02:00").unwrap(), Some(expected));
    assert_eq!(parse_time_arg("2024-05-01 08:30:00").unwrap(), Some(expected));
    assert_eq!(
        parse_time_arg("2024-05-01").unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(parse_time_arg("  ").unwrap(), None);
    assert!(parse_time_arg("yesterday").unwrap_err().is_validation());
}

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db.clone()).with_topic("ingest");
    let payload = serde_json::json!({ "contact_id": "U2" });

    let first = producer
        .enqueue_event(EventType::ContactProfile, "U1", "contact_profile", "U2", &payload, "x")
        .await
        .unwrap();
    let id = first.event_id().unwrap();

    let second = producer
        .enqueue_event(EventType::ContactProfile, "U1", "contact_profile", "U2", &payload, "x")
        .await
        .unwrap();
    assert_eq!(second, EnqueueOutcome::Duplicate);

    let event = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(event.get_status().unwrap(), EventStatus::Pending);
    assert_eq!(event.get_publish_status().unwrap(), PublishStatus::Pending);
    assert_eq!(event.topic.as_deref(), Some("ingest"));
    assert_eq!(event.payload()["contact_id"], "U2");
    assert_eq!(db.event_stats().await.unwrap().process.pending, 1);
}

#[tokio::test]
async fn test_enqueue_validation() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db);

    assert!(producer.enqueue_self_profile(" ").await.unwrap_err().is_validation());
    assert!(producer
        .enqueue_contact_profile("U1", "")
        .await
        .unwrap_err()
        .is_validation());
    assert!(producer
        .enqueue_chat_messages_page(&ChatPageRequest {
            tenant_user_id: "U1".to_string(),
            source_type: "chat_private".to_string(),
            target_id: "U2".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err()
        .is_validation());
}

#[tokio::test]
async fn test_profile_events_dedup_by_minute() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db);

    let before = Utc::now().timestamp() / 60;
    let id = producer
        .enqueue_group_profile("U1", "G1")
        .await
        .unwrap()
        .event_id()
        .unwrap();
    let after = Utc::now().timestamp() / 60;

    let event = producer.db().get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(event.source_key, "G1");
    assert_eq!(event.payload()["group_id"], "G1");
    assert!((before..=after).any(|minute| {
        event.dedup_key
            == incremental_dedup_key("U1", EventType::GroupProfile, "group_profile", "G1", &minute.to_string())
    }));
}

#[tokio::test]
async fn test_chat_page_defaults() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db.clone());
    let since = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

    let req = ChatPageRequest {
        tenant_user_id: "U1".to_string(),
        session_uuid: "S1".to_string(),
        session_type: 1,
        source_type: "chat_private".to_string(),
        source_key: "U2".to_string(),
        since: Some(since),
        dedup_extra: "msg-42".to_string(),
        ..Default::default()
    };
    let id = producer
        .enqueue_chat_messages_page(&req)
        .await
        .unwrap()
        .event_id()
        .unwrap();
    assert_eq!(
        producer.enqueue_chat_messages_page(&req).await.unwrap(),
        EnqueueOutcome::Duplicate
    );

    let event = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(event.get_type().unwrap(), EventType::ChatMessagesPage);
    assert_eq!(event.source_key, "U2");
    let payload: ChatPagePayload = serde_json::from_str(&event.payload_json).unwrap();
    assert_eq!(payload.target_id, "U2");
    assert_eq!(payload.page, 1);
    assert_eq!(payload.page_size, DEFAULT_PAGE_SIZE as i64);
    assert_eq!(payload.since, "2024-05-01T00:00:00Z");
    assert_eq!(payload.until, "");

    let big = ChatPageRequest {
        page_size: 5000,
        dedup_extra: String::new(),
        ..req
    };
    let id = producer
        .enqueue_chat_messages_page(&big)
        .await
        .unwrap()
        .event_id()
        .unwrap();
    let event = db.get_ingest_event(id).await.unwrap().unwrap();
    let payload: ChatPagePayload = serde_json::from_str(&event.payload_json).unwrap();
    assert_eq!(payload.page_size, MAX_PAGE_SIZE as i64);
}

#[tokio::test]
async fn test_schedule_backfill() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db.clone());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let reader = reader_with_history(t0).await;

    let report = producer
        .schedule_backfill(
            &reader,
            &reader,
            &BackfillRequest {
                tenant_user_id: "U1".to_string(),
                page_size: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // self + contact + group + three pages of 2/2/1 messages
    assert_eq!(report.sessions, 1);
    assert_eq!(report.pages, 3);
    assert_eq!(report.messages, 5);
    assert_eq!(report.total_events, 6);

    let job = db.get_backfill_job(report.job_id).await.unwrap().unwrap();
    assert_eq!(job.get_status().unwrap(), JobStatus::Running);
    assert_eq!(job.total_events, 6);
    assert_eq!(job.page_size, 2);
    assert_eq!(db.count_job_events(report.job_id).await.unwrap(), 6);

    let key = format!("bf_{}_chat_messages_page_chat_private_U2_3", report.job_id);
    let event = db.get_ingest_event_by_dedup_key(&key).await.unwrap().unwrap();
    assert_eq!(event.backfill_job_id, Some(report.job_id));
    let payload: ChatPagePayload = serde_json::from_str(&event.payload_json).unwrap();
    assert_eq!(payload.page, 3);
    assert_eq!(payload.session_type, 1);

    let key = format!("bf_{}_group_profile_group_profile_G1_0", report.job_id);
    assert!(db.get_ingest_event_by_dedup_key(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_backfill_limits_and_window() {
    let (db, _tmp) = setup_test_db().await;
    let producer = EventProducer::new(db);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let reader = reader_with_history(t0).await;

    let capped = producer
        .schedule_backfill(
            &reader,
            &reader,
            &BackfillRequest {
                tenant_user_id: "U1".to_string(),
                page_size: 2,
                max_pages_per_session: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(capped.pages, 2);
    assert_eq!(capped.messages, 4);

    // Every message is after `until`: the whole history is scanned, nothing scheduled
    let windowed = producer
        .schedule_backfill(
            &reader,
            &reader,
            &BackfillRequest {
                tenant_user_id: "U1".to_string(),
                page_size: 2,
                until: "2024-05-01T07:00:00Z".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(windowed.pages, 0);
    assert_eq!(windowed.total_events, 3);

    // Newest page is past `until` but the older pages are not
    let older = producer
        .schedule_backfill(
            &reader,
            &reader,
            &BackfillRequest {
                tenant_user_id: "U1".to_string(),
                page_size: 2,
                until: "2024-05-01T08:01:00Z".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(older.pages, 2);
    assert_eq!(older.messages, 2);
    assert_eq!(older.total_events, 5);

    assert!(producer
        .schedule_backfill(&reader, &reader, &BackfillRequest::default())
        .await
        .unwrap_err()
        .is_validation());
    assert!(producer
        .schedule_backfill(
            &reader,
            &reader,
            &BackfillRequest {
                tenant_user_id: "U1".to_string(),
                since: "last week".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err()
        .is_validation());
}
