//! In-process collaborator implementations.
//!
//! Back the gateway's dev mode and the test suite. Production deployments
//! swap these for database- and index-backed implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use cairn_domain::error::{Error, Result};
use cairn_domain::fragment::{Citation, Fragment};
use cairn_domain::trace::RunTrace;

use super::{AttachmentStore, ChatStore, SearchBackend, SearchRequest, StoredMessage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryChatStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
struct ChatRecord {
    title: String,
    user_id: String,
}

#[derive(Default)]
pub struct MemoryChatStore {
    chats: Mutex<HashMap<String, ChatRecord>>,
    messages: Mutex<Vec<StoredMessage>>,
    traces: Mutex<Vec<RunTrace>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages.lock().clone()
    }

    pub fn traces(&self) -> Vec<RunTrace> {
        self.traces.lock().clone()
    }

    pub fn title_of(&self, chat_id: &str) -> Option<String> {
        self.chats.lock().get(chat_id).map(|c| c.title.clone())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn chat_exists(&self, chat_id: &str) -> Result<bool> {
        Ok(self.chats.lock().contains_key(chat_id))
    }

    async fn create_chat(&self, chat_id: &str, user_id: &str, title: &str) -> Result<()> {
        self.chats.lock().insert(
            chat_id.to_string(),
            ChatRecord {
                title: title.to_string(),
                user_id: user_id.to_string(),
            },
        );
        Ok(())
    }

    async fn set_title(&self, chat_id: &str, title: &str) -> Result<()> {
        let mut chats = self.chats.lock();
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| Error::ChatNotFound(chat_id.to_string()))?;
        chat.title = title.to_string();
        Ok(())
    }

    async fn insert_message(&self, message: StoredMessage) -> Result<String> {
        let id = message.id.clone();
        self.messages.lock().push(message);
        Ok(id)
    }

    async fn update_message(
        &self,
        message_id: &str,
        text: &str,
        citations: &[Citation],
    ) -> Result<()> {
        let mut messages = self.messages.lock();
        let msg = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::Persistence(format!("unknown message: {message_id}")))?;
        msg.text = text.to_string();
        msg.citations = citations.to_vec();
        Ok(())
    }

    async fn persist_trace(&self, trace: &RunTrace) -> Result<()> {
        self.traces.lock().push(trace.clone());
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemorySearchBackend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A canned search index: fragments are matched by case-insensitive
/// substring against query terms, honoring app filters and exclusions.
#[derive(Default)]
pub struct MemorySearchBackend {
    fragments: Mutex<Vec<Fragment>>,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, fragments: Vec<Fragment>) {
        self.fragments.lock().extend(fragments);
    }
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn search(&self, req: SearchRequest) -> Result<Vec<Fragment>> {
        let query = req.query.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        let fragments = self.fragments.lock();
        let mut hits: Vec<Fragment> = fragments
            .iter()
            .filter(|f| req.app.map_or(true, |app| f.source.app == app))
            .filter(|f| !req.excluded_ids.contains(&f.source.doc_id))
            .filter(|f| {
                let haystack =
                    format!("{} {}", f.source.title, f.content).to_lowercase();
                terms.is_empty() || terms.iter().any(|t| haystack.contains(t))
            })
            .cloned()
            .collect();
        hits.truncate(req.limit);
        Ok(hits)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryAttachmentStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MemoryAttachmentStore {
    by_file: Mutex<HashMap<String, Vec<Fragment>>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, file_id: &str, fragments: Vec<Fragment>) {
        self.by_file
            .lock()
            .insert(file_id.to_string(), fragments);
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn fragments_for(&self, file_id: &str) -> Result<Vec<Fragment>> {
        Ok(self
            .by_file
            .lock()
            .get(file_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_domain::fragment::SourceApp;

    fn frag(doc_id: &str, title: &str, content: &str, app: SourceApp) -> Fragment {
        Fragment {
            id: format!("f-{doc_id}"),
            content: content.into(),
            source: Citation {
                doc_id: doc_id.into(),
                title: title.into(),
                url: None,
                app,
                entity: None,
                chunk_index: 0,
            },
            confidence: 0.9,
            images: vec![],
        }
    }

    #[tokio::test]
    async fn search_honors_app_filter_and_exclusions() {
        let backend = MemorySearchBackend::new();
        backend.seed(vec![
            frag("d1", "Q3 revenue", "quarterly revenue", SourceApp::KnowledgeBase),
            frag("d2", "Q3 deck", "quarterly revenue slides", SourceApp::GoogleDrive),
        ]);

        let hits = backend
            .search(SearchRequest {
                app: Some(SourceApp::GoogleDrive),
                query: "revenue".into(),
                excluded_ids: vec![],
                limit: 10,
                user_id: "u".into(),
                workspace_id: "w".into(),
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source.doc_id, "d2");

        let hits = backend
            .search(SearchRequest {
                app: None,
                query: "revenue".into(),
                excluded_ids: vec!["d1".into()],
                limit: 10,
                user_id: "u".into(),
                workspace_id: "w".into(),
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source.doc_id, "d2");
    }

    #[tokio::test]
    async fn chat_store_round_trip() {
        let store = MemoryChatStore::new();
        store.create_chat("c1", "u1", "untitled").await.unwrap();
        assert!(store.chat_exists("c1").await.unwrap());
        assert!(!store.chat_exists("c2").await.unwrap());

        store.set_title("c1", "Quarterly numbers").await.unwrap();
        assert_eq!(store.title_of("c1").unwrap(), "Quarterly numbers");

        let id = store
            .insert_message(StoredMessage {
                id: "m1".into(),
                chat_id: "c1".into(),
                role: super::super::MessageRole::User,
                text: "hello".into(),
                citations: vec![],
                attachment_ids: vec![],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store.update_message(&id, "hello!", &[]).await.unwrap();
        assert_eq!(store.messages()[0].text, "hello!");
    }
}
