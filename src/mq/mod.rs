//! Message transport contract
//!
//! The relay publishes event ids through a [`Publisher`]; consumer workers
//! receive them through a [`Consumer`] that feeds a [`Handler`]. Delivery is
//! at-least-once; the message is only a wake-up signal.

mod memory;

pub use memory::*;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// A transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(topic: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.to_string(),
            key: key.into(),
            value: value.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Where a published message landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishResult {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<PublishResult>;
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message. The consumer acknowledges it whatever the outcome.
    async fn handle(&self, message: &Message) -> Result<()>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Deliver messages to `handler` until `shutdown` flips to true
    async fn run(&mut self, handler: Arc<dyn Handler>, shutdown: watch::Receiver<bool>) -> Result<()>;
}
