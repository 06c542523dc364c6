//! Chat API endpoints.
//!
//! - `GET  /v1/chat/stream` — run a user turn, streaming SSE events
//! - `POST /v1/chat/stop`   — cancel a running turn

use std::sync::OnceLock;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use regex::Regex;
use serde::Deserialize;

use crate::runtime::registry::ToolsListEntry;
use crate::runtime::{run_chat, ChatEvent, ChatRunRequest};
use crate::state::AppState;
use crate::stores::{ChatStore, MessageRole, StoredMessage};

use super::ApiError;

/// `agentId` values treated as "no agent selected".
const AGENT_ID_SENTINELS: &[&str] = &["", "default"];

fn cuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^c[a-z0-9]{20,31}$").unwrap())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamParams {
    /// The user's question (URL-encoded by the client).
    pub message: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// JSON array of `{connectorId, tools: [externalId…]}`.
    #[serde(default)]
    pub tools_list: Option<String>,
    /// JSON object `{model, reasoning, websearch, deepResearch}`.
    #[serde(default)]
    pub selected_model_config: Option<String>,
    /// JSON array of attachment file ids.
    #[serde(default)]
    pub attachment_ids: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedModelConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub websearch: bool,
    #[serde(default)]
    pub deep_research: bool,
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub chat_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chat/stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatStreamParams>,
) -> Result<impl IntoResponse, ApiError> {
    let request = validate(&state, params).await?;

    let rx = run_chat(state, request);

    Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()))
}

fn sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<ChatEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let name = event.sse_name();
            let data = match &event {
                // String payloads go out raw, not JSON-quoted.
                ChatEvent::ResponseUpdate(text) => text.clone(),
                ChatEvent::ChatTitleUpdate(title) => title.clone(),
                other => serde_json::to_string(other).unwrap_or_default(),
            };
            yield Ok(Event::default().event(name).data(data));
        }
    }
}

/// Validate the raw query parameters into a [`ChatRunRequest`],
/// resolving the chat and persisting the user message.
async fn validate(
    state: &AppState,
    params: ChatStreamParams,
) -> Result<ChatRunRequest, ApiError> {
    let question = params.message.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::invalid_input("message must not be empty"));
    }

    // agentId: sentinel normalizes to none; anything else must be a CUID
    // naming an accessible agent.
    let agent_id = match params.agent_id.as_deref() {
        None => None,
        Some(s) if AGENT_ID_SENTINELS.contains(&s) => None,
        Some(s) => {
            if !cuid_re().is_match(s) {
                return Err(ApiError::invalid_input(format!(
                    "agentId '{s}' is not a valid CUID"
                )));
            }
            if !state.config.agents.contains_key(s) {
                return Err(ApiError::access_denied(format!(
                    "agent '{s}' is not accessible"
                )));
            }
            Some(s.to_string())
        }
    };

    let tools_list: Vec<ToolsListEntry> = match params.tools_list.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ApiError::invalid_input(format!("toolsList is not valid JSON: {e}")))?,
    };

    let model_config: SelectedModelConfig = match params.selected_model_config.as_deref() {
        None | Some("") => SelectedModelConfig::default(),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            ApiError::invalid_input(format!("selectedModelConfig is not valid JSON: {e}"))
        })?,
    };

    let attachment_ids: Vec<String> = match params.attachment_ids.as_deref() {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            ApiError::invalid_input(format!("attachmentIds is not valid JSON: {e}"))
        })?,
    };

    // Resolve or create the chat.
    let (chat_id, is_new_chat) = match params.chat_id {
        Some(id) if !id.is_empty() => {
            if !state
                .chat_store
                .chat_exists(&id)
                .await
                .map_err(ApiError::from)?
            {
                return Err(ApiError::chat_not_found(&id));
            }
            (id, false)
        }
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            state
                .chat_store
                .create_chat(&id, "default-user", "New chat")
                .await
                .map_err(ApiError::from)?;
            (id, true)
        }
    };

    // Persist the user message before any streaming starts.
    let user_message_id = state
        .chat_store
        .insert_message(StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.clone(),
            role: MessageRole::User,
            text: question.clone(),
            citations: Vec::new(),
            attachment_ids: attachment_ids.clone(),
            created_at: chrono::Utc::now(),
        })
        .await
        .map_err(ApiError::from)?;

    Ok(ChatRunRequest {
        chat_id,
        user_message_id,
        user_id: "default-user".into(),
        workspace_id: "default-workspace".into(),
        question,
        agent_id,
        attachment_ids,
        model: model_config.model,
        tools_list,
        is_new_chat,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stop(
    State(state): State<AppState>,
    Json(body): Json<StopRequest>,
) -> impl IntoResponse {
    let stopped = state.cancel_map.cancel(&body.chat_id);
    Json(serde_json::json!({ "stopped": stopped }))
}
