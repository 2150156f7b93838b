use super::*;
use crate::config::OutboxConfig;
use crate::error::Error;
use crate::meta::tests::setup_test_db;
use crate::meta::{EventType, NewBackfillJob, NewIngestEvent, PublishStatus};
use crate::mq::{MemoryBroker, PublishResult};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<Message>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: Message) -> Result<PublishResult> {
        let mut sent = self.sent.lock().await;
        sent.push(message);
        Ok(PublishResult {
            partition: 3,
            offset: sent.len() as i64 - 1,
        })
    }
}

struct DownPublisher;

#[async_trait]
impl Publisher for DownPublisher {
    async fn publish(&self, _message: Message) -> Result<PublishResult> {
        Err(Error::Transport("broker unreachable".to_string()))
    }
}

fn event(key: &str, topic: Option<&str>, job: Option<i64>) -> NewIngestEvent {
    NewIngestEvent {
        event_type: EventType::ContactProfile,
        tenant_user_id: "U1".to_string(),
        backfill_job_id: job,
        source_type: "contact_profile".to_string(),
        source_key: "U2".to_string(),
        payload_json: r#"{"contact_id":"U2"}"#.to_string(),
        dedup_key: key.to_string(),
        topic: topic.map(str::to_string),
    }
}

fn config(topic: &str) -> OutboxConfig {
    OutboxConfig {
        topic: topic.to_string(),
        ..Default::default()
    }
}

fn parse_ts(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
}

#[test]
fn test_backoff_is_monotonic_and_capped() {
    let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(300));
    assert_eq!(backoff.delay(0), Duration::from_millis(500));
    assert_eq!(backoff.delay(1), Duration::from_secs(1));
    assert_eq!(backoff.delay(3), Duration::from_secs(4));

    let delays: Vec<Duration> = (0..40).map(|n| backoff.delay(n)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(backoff.delay(10), Duration::from_secs(300));
    assert_eq!(backoff.delay(39), Duration::from_secs(300));
    assert_eq!(backoff.delay(-4), Duration::from_millis(500));
}

#[tokio::test]
async fn test_publishes_claimed_events() {
    let (db, _tmp) = setup_test_db().await;
    let job = db
        .create_backfill_job(&NewBackfillJob {
            tenant_user_id: "U1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let id = db
        .insert_ingest_event(&event("inc_abc", None, Some(job)))
        .await
        .unwrap()
        .unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let relay = OutboxRelay::new(&config("ingest"), db.clone(), publisher.clone());

    let pass = relay.run_once().await.unwrap();
    assert_eq!(pass, RelayPass { claimed: 1, published: 1, failed: 0 });

    let sent = publisher.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "ingest");
    assert_eq!(sent[0].key, b"inc_abc");
    assert_eq!(sent[0].value_str(), id.to_string());
    assert_eq!(sent[0].headers["event_type"], "contact_profile");
    assert_eq!(sent[0].headers["dedup_key"], "inc_abc");
    assert_eq!(sent[0].headers["event_id"], id.to_string());
    drop(sent);

    let row = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(row.get_publish_status().unwrap(), PublishStatus::Published);
    assert_eq!(row.topic.as_deref(), Some("ingest"));
    assert_eq!(row.msg_partition, Some(3));
    assert_eq!(row.msg_offset, Some(0));
    assert!(row.published_at.is_some());

    let job = db.get_backfill_job(job).await.unwrap().unwrap();
    assert_eq!(job.published_events, 1);

    // Nothing left to claim
    assert_eq!(relay.run_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn test_falls_back_to_event_topic() {
    let (db, _tmp) = setup_test_db().await;
    let id = db
        .insert_ingest_event(&event("inc_1", Some("per-event"), None))
        .await
        .unwrap()
        .unwrap();

    let broker = MemoryBroker::new(2);
    let relay = OutboxRelay::new(&config(""), db.clone(), Arc::new(broker.clone()));
    relay.run_once().await.unwrap();

    assert_eq!(broker.published_count("per-event").unwrap(), 1);
    let row = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(row.topic.as_deref(), Some("per-event"));
}

#[tokio::test]
async fn test_empty_topic_is_a_delayed_failure() {
    let (db, _tmp) = setup_test_db().await;
    let id = db
        .insert_ingest_event(&event("inc_1", None, None))
        .await
        .unwrap()
        .unwrap();

    let relay = OutboxRelay::new(&config(""), db.clone(), Arc::new(RecordingPublisher::default()));
    let before = Utc::now();
    let pass = relay.run_once().await.unwrap();
    assert_eq!(pass.failed, 1);

    let row = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(row.get_publish_status().unwrap(), PublishStatus::Failed);
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("topic is empty"));
    let retry_at = parse_ts(row.next_retry_at.as_deref().unwrap());
    assert!(retry_at >= before + chrono::Duration::seconds(299));
}

#[tokio::test]
async fn test_publish_failure_schedules_backoff() {
    let (db, _tmp) = setup_test_db().await;
    let id = db
        .insert_ingest_event(&event("inc_1", None, None))
        .await
        .unwrap()
        .unwrap();

    let relay = OutboxRelay::new(&config("ingest"), db.clone(), Arc::new(DownPublisher));
    let before = Utc::now();
    assert_eq!(relay.run_once().await.unwrap().failed, 1);

    let row = db.get_ingest_event(id).await.unwrap().unwrap();
    assert_eq!(row.get_publish_status().unwrap(), PublishStatus::Failed);
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("Transport error: broker unreachable"));
    let retry_at = parse_ts(row.next_retry_at.as_deref().unwrap());
    assert!(retry_at >= before + chrono::Duration::milliseconds(400));
    assert!(retry_at <= Utc::now() + chrono::Duration::seconds(2));

    // Not due yet
    assert_eq!(relay.run_once().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (db, _tmp) = setup_test_db().await;
    let relay = OutboxRelay::new(&config("ingest"), db, Arc::new(RecordingPublisher::default()));
    let (tx, rx) = crate::shutdown::channel();

    let handle = tokio::spawn(async move { relay.run(rx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap();
    assert!(result.unwrap().is_ok());
}
