//! In-process partitioned broker
//!
//! Each topic has a fixed number of partitions, each an unbounded tokio
//! channel with its own offset counter. Keys hash to partitions with blake3,
//! so one key always lands on the same partition. A consumer owns a subset of
//! the partitions (`partition % members == member`).

use super::{Consumer, Handler, Message, PublishResult, Publisher};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::select_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

type Delivery = (Message, i32, i64);

struct Partition {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
    next_offset: i64,
}

/// Shared handle to the broker
#[derive(Clone)]
pub struct MemoryBroker {
    partitions: usize,
    topics: Arc<Mutex<HashMap<String, Vec<Partition>>>>,
}

impl MemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    fn partition_for(&self, key: &[u8]) -> usize {
        let hash = blake3::hash(key);
        let b = hash.as_bytes();
        let n = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        (n % self.partitions as u64) as usize
    }

    fn with_topic<T>(&self, topic: &str, f: impl FnOnce(&mut Vec<Partition>) -> T) -> Result<T> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| Error::Transport("broker lock poisoned".to_string()))?;
        let partitions = topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.partitions)
                .map(|_| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    Partition {
                        tx,
                        rx: Some(rx),
                        next_offset: 0,
                    }
                })
                .collect()
        });
        Ok(f(partitions))
    }

    /// Take the partitions of `topic` owned by consumer `member` of `members`
    pub fn consumer(&self, topic: &str, member: usize, members: usize) -> Result<MemoryConsumer> {
        let members = members.max(1);
        let receivers = self.with_topic(topic, |partitions| {
            partitions
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| i % members == member)
                .map(|(_, p)| p.rx.take())
                .collect::<Option<Vec<_>>>()
        })?;

        let receivers = receivers.ok_or_else(|| {
            Error::Transport(format!(
                "partitions of topic '{}' for member {} are already taken",
                topic, member
            ))
        })?;
        if receivers.is_empty() {
            return Err(Error::Transport(format!(
                "member {} of {} owns no partitions of '{}'",
                member, members, topic
            )));
        }

        Ok(MemoryConsumer {
            topic: topic.to_string(),
            receivers,
        })
    }

    /// Messages published to `topic` so far
    pub fn published_count(&self, topic: &str) -> Result<i64> {
        self.with_topic(topic, |partitions| partitions.iter().map(|p| p.next_offset).sum())
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, message: Message) -> Result<PublishResult> {
        if message.topic.is_empty() {
            return Err(Error::Transport("empty topic".to_string()));
        }

        let index = self.partition_for(&message.key);
        let topic = message.topic.clone();
        self.with_topic(&topic, |partitions| {
            let partition = &mut partitions[index];
            let offset = partition.next_offset;
            partition
                .tx
                .send((message, index as i32, offset))
                .map_err(|_| Error::Transport(format!("partition {} is closed", index)))?;
            partition.next_offset += 1;
            Ok(PublishResult {
                partition: index as i32,
                offset,
            })
        })?
    }
}

/// Consumer over a subset of one topic's partitions
pub struct MemoryConsumer {
    topic: String,
    receivers: Vec<mpsc::UnboundedReceiver<Delivery>>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn run(
        &mut self,
        handler: Arc<dyn Handler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        debug!(
            topic = %self.topic,
            partitions = self.receivers.len(),
            "Consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = select_all(self.receivers.iter_mut().map(|rx| Box::pin(rx.recv())));
            let delivery = tokio::select! {
                (received, _, _) = next => received,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let Some((message, partition, offset)) = delivery else {
                debug!(topic = %self.topic, "Partition closed, stopping consumer");
                break;
            };

            if let Err(e) = handler.handle(&message).await {
                warn!(
                    topic = %self.topic,
                    partition,
                    offset,
                    error = %e,
                    "Handler failed, acknowledging anyway"
                );
            }
        }

        debug!(topic = %self.topic, "Consumer stopped");
        Ok(())
    }
}
