//! In-memory readers

use super::{paginate, ChatMessage, ChatReader, ChatSession, ProfileKind, ProfileRead, ProfileReader};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

type ProfileKey = (String, ProfileKind, String);

/// Reader over maps populated by the caller
#[derive(Default)]
pub struct MemoryReader {
    sessions: RwLock<HashMap<String, Vec<ChatSession>>>,
    messages: RwLock<HashMap<(String, String), Vec<ChatMessage>>>,
    profiles: RwLock<HashMap<ProfileKey, ProfileRead>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_session(&self, tenant_user_id: &str, session: ChatSession) {
        self.sessions
            .write()
            .await
            .entry(tenant_user_id.to_string())
            .or_default()
            .push(session);
    }

    pub async fn add_messages(&self, tenant_user_id: &str, session_uuid: &str, messages: Vec<ChatMessage>) {
        self.messages
            .write()
            .await
            .entry((tenant_user_id.to_string(), session_uuid.to_string()))
            .or_default()
            .extend(messages);
    }

    pub async fn set_profile(&self, tenant_user_id: &str, kind: ProfileKind, id: &str, read: ProfileRead) {
        self.profiles
            .write()
            .await
            .insert((tenant_user_id.to_string(), kind, id.to_string()), read);
    }
}

#[async_trait]
impl ChatReader for MemoryReader {
    async fn list_sessions(&self, tenant_user_id: &str) -> Result<Vec<ChatSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(tenant_user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_page(
        &self,
        tenant_user_id: &str,
        session: &ChatSession,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>> {
        let messages = self
            .messages
            .read()
            .await
            .get(&(tenant_user_id.to_string(), session.session_uuid.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(paginate(messages, page, page_size))
    }
}

#[async_trait]
impl ProfileReader for MemoryReader {
    async fn read_profile(&self, tenant_user_id: &str, kind: ProfileKind, id: &str) -> ProfileRead {
        self.profiles
            .read()
            .await
            .get(&(tenant_user_id.to_string(), kind, id.to_string()))
            .cloned()
            .unwrap_or(ProfileRead::Empty)
    }

    async fn list_ids(&self, tenant_user_id: &str, kind: ProfileKind) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .profiles
            .read()
            .await
            .keys()
            .filter(|(t, k, _)| t == tenant_user_id && *k == kind)
            .map(|(_, _, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
