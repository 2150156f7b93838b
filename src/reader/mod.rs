//! Readers for chat history and profile documents
//!
//! Readers are the producers' view of the chat system. They return nothing
//! (not an error) when there is simply nothing to ingest; profile reads are
//! tri-state so an empty profile can be told apart from a failed read.

mod fs;
mod memory;

pub use fs::FsReader;
pub use memory::MemoryReader;

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Private or group conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Private,
    Group,
}

impl SessionKind {
    /// Numeric code carried in event payloads
    pub fn code(&self) -> i64 {
        match self {
            SessionKind::Private => 1,
            SessionKind::Group => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SessionKind::Private),
            2 => Some(SessionKind::Group),
            _ => None,
        }
    }

    /// Knowledge source type for messages of this kind of session
    pub fn source_type(&self) -> &'static str {
        match self {
            SessionKind::Private => "chat_private",
            SessionKind::Group => "chat_group",
        }
    }
}

/// A session visible to a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_uuid: String,
    /// Peer user id for private chats, group id for group chats
    pub target_id: String,
    pub kind: SessionKind,
    #[serde(default)]
    pub name: String,
}

/// Which profile document to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    SelfProfile,
    Contact,
    Group,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::SelfProfile => "self",
            ProfileKind::Contact => "contact",
            ProfileKind::Group => "group",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "self" => Ok(ProfileKind::SelfProfile),
            "contact" => Ok(ProfileKind::Contact),
            "group" => Ok(ProfileKind::Group),
            other => Err(Error::validation(format!("unknown profile kind: {}", other))),
        }
    }
}

/// Outcome of reading a profile document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRead {
    Content(String),
    /// The profile exists but has nothing to ingest, or no longer exists
    Empty,
    /// The read itself failed; nothing can be concluded about the profile
    Failed(String),
}

impl ProfileRead {
    /// Classify raw text, treating whitespace-only as empty
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            ProfileRead::Empty
        } else {
            ProfileRead::Content(trimmed.to_string())
        }
    }
}

#[async_trait]
pub trait ChatReader: Send + Sync {
    /// Every session the tenant can see
    async fn list_sessions(&self, tenant_user_id: &str) -> Result<Vec<ChatSession>>;

    /// One raw page of a session, newest first. Pages start at 1.
    async fn read_page(
        &self,
        tenant_user_id: &str,
        session: &ChatSession,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// One page with empty messages and anything at or before `since` removed
    async fn read_messages(
        &self,
        tenant_user_id: &str,
        session: &ChatSession,
        page: usize,
        page_size: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        let raw = self.read_page(tenant_user_id, session, page, page_size).await?;
        Ok(raw
            .into_iter()
            .filter(|m| !m.content.trim().is_empty())
            .filter(|m| since.map_or(true, |s| m.created_at > s))
            .collect())
    }
}

#[async_trait]
pub trait ProfileReader: Send + Sync {
    async fn read_profile(&self, tenant_user_id: &str, kind: ProfileKind, id: &str) -> ProfileRead;

    /// Ids of every profile of `kind` the tenant can see
    async fn list_ids(&self, tenant_user_id: &str, kind: ProfileKind) -> Result<Vec<String>>;
}

/// Sort newest first and cut out one 1-based page
pub(crate) fn paginate(mut messages: Vec<ChatMessage>, page: usize, page_size: usize) -> Vec<ChatMessage> {
    messages.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let page = page.max(1);
    if page_size == 0 {
        return Vec::new();
    }
    messages
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, secs: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: "S1".to_string(),
            sender_id: "U2".to_string(),
            sender_name: "Bob".to_string(),
            content: content.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_paginate_newest_first() {
        let messages = vec![msg("a", 0, "x"), msg("b", 10, "y"), msg("c", 20, "z")];

        let first = paginate(messages.clone(), 1, 2);
        assert_eq!(first.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);

        let second = paginate(messages.clone(), 2, 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "a");

        assert!(paginate(messages, 3, 2).is_empty());
    }

    #[test]
    fn test_profile_read_from_text() {
        assert_eq!(ProfileRead::from_text("  \n"), ProfileRead::Empty);
        assert_eq!(
            ProfileRead::from_text(" hi "),
            ProfileRead::Content("hi".to_string())
        );
    }

    #[test]
    fn test_session_kind_codes() {
        assert_eq!(SessionKind::from_code(1), Some(SessionKind::Private));
        assert_eq!(SessionKind::from_code(2), Some(SessionKind::Group));
        assert_eq!(SessionKind::from_code(0), None);
        assert_eq!(SessionKind::Group.source_type(), "chat_group");
        assert_eq!("contact".parse::<ProfileKind>().unwrap(), ProfileKind::Contact);
    }
}
