use std::sync::Arc;

use cairn_domain::config::Config;
use cairn_providers::ProviderRegistry;

use crate::runtime::cancel::CancelMap;
use crate::stores::{AttachmentStore, ChatStore, SearchBackend};

/// Shared application state passed to all API handlers.
///
/// - **Core services** — config, LLM providers
/// - **Collaborators** — chat persistence, search index, attachments
/// - **Runtime** — per-chat cancellation
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,

    pub chat_store: Arc<dyn ChatStore>,
    pub search: Arc<dyn SearchBackend>,
    pub attachments: Arc<dyn AttachmentStore>,

    pub cancel_map: Arc<CancelMap>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        llm: Arc<ProviderRegistry>,
        chat_store: Arc<dyn ChatStore>,
        search: Arc<dyn SearchBackend>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            config,
            llm,
            chat_store,
            search,
            attachments,
            cancel_map: Arc::new(CancelMap::new()),
        }
    }
}
