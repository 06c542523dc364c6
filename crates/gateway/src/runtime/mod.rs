//! Core runtime — the orchestrator that ties planning, LLM streaming,
//! tool dispatch, review, synthesis, and persistence into one
//! deterministic per-run loop.
//!
//! Entry point: [`turn::run_chat`] takes a validated chat request and
//! returns a channel of [`events::ChatEvent`]s suitable for SSE.

pub mod cancel;
pub mod citations;
pub mod delegation;
pub mod events;
pub mod expectations;
pub mod fragments;
pub mod hooks;
pub mod mcp_agent;
pub mod plan;
pub mod prompts;
pub mod ranker;
pub mod registry;
pub mod review;
pub mod run;
pub mod selector;
pub mod synthesizer;
pub mod turn;

pub use events::ChatEvent;
pub use turn::{run_chat, ChatRunRequest};

use cairn_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};

/// Canonical names of the built-in tools.
pub mod tool_names {
    pub const TODO_WRITE: &str = "toDoWrite";
    pub const SYNTHESIZE_FINAL_ANSWER: &str = "synthesize_final_answer";
    pub const SEARCH_GLOBAL: &str = "searchGlobal";
    pub const SEARCH_KNOWLEDGE_BASE: &str = "searchKnowledgeBase";
    pub const SEARCH_GMAIL: &str = "searchGmail";
    pub const SEARCH_DRIVE: &str = "searchDrive";
    pub const SEARCH_CALENDAR: &str = "searchCalendar";
    pub const SEARCH_CONTACTS: &str = "searchContacts";
    pub const SLACK_MESSAGES: &str = "getSlackRelatedMessages";
    pub const FALL_BACK: &str = "fall_back";
    pub const LIST_CUSTOM_AGENTS: &str = "list_custom_agents";
    pub const RUN_PUBLIC_AGENT: &str = "run_public_agent";
}

/// Assemble the assistant message that carries tool calls back into the
/// conversation history.
pub(crate) fn build_assistant_tool_message(text: &str, tool_calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }
    for tc in tool_calls {
        parts.push(ContentPart::ToolUse {
            id: tc.call_id.clone(),
            name: tc.tool_name.clone(),
            input: tc.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Fallback chat title: the first words of the question.
pub(crate) fn fallback_title(question: &str) -> String {
    let words: Vec<&str> = question.split_whitespace().take(6).collect();
    if words.is_empty() {
        "New chat".to_string()
    } else {
        words.join(" ")
    }
}
