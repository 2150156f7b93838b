//! Directory-backed readers
//!
//! Layout under the data directory, one directory per tenant:
//!
//! ```text
//! <tenant>/sessions.json                 [ChatSession, ...]
//! <tenant>/messages/<session_uuid>.json  [ChatMessage, ...] in any order
//! <tenant>/profiles/self.txt
//! <tenant>/profiles/contact/<id>.txt
//! <tenant>/profiles/group/<id>.txt
//! ```

use super::{paginate, ChatMessage, ChatReader, ChatSession, ProfileKind, ProfileRead, ProfileReader};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct FsReader {
    root: PathBuf,
}

impl FsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant_user_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(path_component(tenant_user_id)?))
    }

    fn profile_path(&self, tenant_user_id: &str, kind: ProfileKind, id: &str) -> Result<PathBuf> {
        let profiles = self.tenant_dir(tenant_user_id)?.join("profiles");
        Ok(match kind {
            ProfileKind::SelfProfile => profiles.join("self.txt"),
            ProfileKind::Contact | ProfileKind::Group => profiles
                .join(kind.as_str())
                .join(format!("{}.txt", path_component(id)?)),
        })
    }
}

/// Reject ids that would escape their directory
fn path_component(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(Error::Reader(format!("invalid path component: {:?}", id)));
    }
    Ok(id)
}

/// Read a file, mapping "not found" to `None`
async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ChatReader for FsReader {
    async fn list_sessions(&self, tenant_user_id: &str) -> Result<Vec<ChatSession>> {
        let path = self.tenant_dir(tenant_user_id)?.join("sessions.json");
        match read_optional(&path).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Reader(format!("{}: {}", path.display(), e))),
            None => Ok(Vec::new()),
        }
    }

    async fn read_page(
        &self,
        tenant_user_id: &str,
        session: &ChatSession,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ChatMessage>> {
        let path = self
            .tenant_dir(tenant_user_id)?
            .join("messages")
            .join(format!("{}.json", path_component(&session.session_uuid)?));

        let Some(raw) = read_optional(&path).await? else {
            debug!(path = %path.display(), "No message file for session");
            return Ok(Vec::new());
        };

        let messages: Vec<ChatMessage> = serde_json::from_str(&raw)
            .map_err(|e| Error::Reader(format!("{}: {}", path.display(), e)))?;
        Ok(paginate(messages, page, page_size))
    }
}

#[async_trait]
impl ProfileReader for FsReader {
    async fn read_profile(&self, tenant_user_id: &str, kind: ProfileKind, id: &str) -> ProfileRead {
        let path = match self.profile_path(tenant_user_id, kind, id) {
            Ok(p) => p,
            Err(e) => return ProfileRead::Failed(e.to_string()),
        };

        match read_optional(&path).await {
            Ok(Some(text)) => ProfileRead::from_text(&text),
            Ok(None) => ProfileRead::Empty,
            Err(e) => ProfileRead::Failed(e.to_string()),
        }
    }

    async fn list_ids(&self, tenant_user_id: &str, kind: ProfileKind) -> Result<Vec<String>> {
        if kind == ProfileKind::SelfProfile {
            let path = self.profile_path(tenant_user_id, kind, tenant_user_id)?;
            let exists = fs::try_exists(&path).await?;
            return Ok(if exists {
                vec![tenant_user_id.trim().to_string()]
            } else {
                Vec::new()
            });
        }

        let dir = self
            .tenant_dir(tenant_user_id)?
            .join("profiles")
            .join(kind.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
