//! Per-chat cancellation tokens.
//!
//! Each running chat gets a `CancelToken`; `POST /v1/chat/stop` cancels
//! it. Delegated sub-runs share the parent's token, so one stop request
//! halts the whole tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation token checked at every suspension point of the run.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tracks the active cancellation token per chat id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a chat.
    pub fn register(&self, chat_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(chat_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running chat. Returns true if a token was found.
    pub fn cancel(&self, chat_id: &str) -> bool {
        match self.tokens.lock().get(chat_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token once the run completes.
    pub fn remove(&self, chat_id: &str) {
        self.tokens.lock().remove(chat_id);
    }

    pub fn is_running(&self, chat_id: &str) -> bool {
        self.tokens.lock().contains_key(chat_id)
    }
}
