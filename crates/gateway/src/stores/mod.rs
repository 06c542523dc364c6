//! Collaborator contracts.
//!
//! Persistence, retrieval, and attachment extraction are external
//! systems; the engine consumes them through these traits. The `memory`
//! module provides the in-process implementations used by dev mode and
//! the test suite.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cairn_domain::error::Result;
use cairn_domain::fragment::{Citation, Fragment, SourceApp};
use cairn_domain::trace::RunTrace;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Chat/message persistence contract.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn chat_exists(&self, chat_id: &str) -> Result<bool>;

    async fn create_chat(&self, chat_id: &str, user_id: &str, title: &str) -> Result<()>;

    async fn set_title(&self, chat_id: &str, title: &str) -> Result<()>;

    /// Insert a message and return its id.
    async fn insert_message(&self, message: StoredMessage) -> Result<String>;

    /// Replace the text and citations of an existing message.
    async fn update_message(
        &self,
        message_id: &str,
        text: &str,
        citations: &[Citation],
    ) -> Result<()>;

    /// Persist the run trace. Called exactly once per run that persisted
    /// at least one user message, on every exit path.
    async fn persist_trace(&self, trace: &RunTrace) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Restrict to one app; `None` searches everything the workspace has.
    pub app: Option<SourceApp>,
    pub query: String,
    /// Document ids the caller has already seen.
    pub excluded_ids: Vec<String>,
    pub limit: usize,
    pub user_id: String,
    pub workspace_id: String,
}

/// The enterprise search index contract.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, req: SearchRequest) -> Result<Vec<Fragment>>;
}

/// Attachment fragment extraction contract.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Fragments previously extracted from an uploaded file.
    async fn fragments_for(&self, file_id: &str) -> Result<Vec<Fragment>>;
}
