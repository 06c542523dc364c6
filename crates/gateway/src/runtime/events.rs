//! The SSE event model — everything the engine ever sends to a client.

use serde::Serialize;
use std::collections::BTreeMap;

use cairn_domain::fragment::{Citation, FragmentImageReference};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reasoning steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    TurnStart,
    TurnEnd,
    ToolCallStart,
    ToolCallEnd,
    Review,
    Synthesis,
    Delegation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Started,
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<ReasoningStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_summary: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationsPayload {
    /// Cited fragments' sources, in first-appearance order.
    pub context_chunks: Vec<Citation>,
    /// Citation ordinal (1-based, as written in the answer) to index into
    /// `context_chunks`.
    pub citation_map: BTreeMap<u32, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCitationPayload {
    pub image: FragmentImageReference,
    /// Citation key of the fragment the image belongs to.
    pub citation_key: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChatEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events streamed to the client over SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
    ResponseMetadata {
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    ChatTitleUpdate(String),
    AttachmentUpdate {
        #[serde(rename = "messageId")]
        message_id: String,
        attachments: Vec<String>,
    },
    Reasoning(ReasoningPayload),
    /// Raw text chunk of the answer.
    ResponseUpdate(String),
    CitationsUpdate(CitationsPayload),
    ImageCitationUpdate(ImageCitationPayload),
    Error {
        error: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    End {},
}

impl ChatEvent {
    /// The SSE `event:` name for this payload.
    pub fn sse_name(&self) -> &'static str {
        match self {
            ChatEvent::ResponseMetadata { .. } => "ResponseMetadata",
            ChatEvent::ChatTitleUpdate(_) => "ChatTitleUpdate",
            ChatEvent::AttachmentUpdate { .. } => "AttachmentUpdate",
            ChatEvent::Reasoning(_) => "Reasoning",
            ChatEvent::ResponseUpdate(_) => "ResponseUpdate",
            ChatEvent::CitationsUpdate(_) => "CitationsUpdate",
            ChatEvent::ImageCitationUpdate(_) => "ImageCitationUpdate",
            ChatEvent::Error { .. } => "Error",
            ChatEvent::End {} => "End",
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        ChatEvent::Reasoning(ReasoningPayload {
            text: text.into(),
            step: None,
            quick_summary: None,
        })
    }

    pub fn reasoning_step(text: impl Into<String>, step: ReasoningStep) -> Self {
        ChatEvent::Reasoning(ReasoningPayload {
            text: text.into(),
            step: Some(step),
            quick_summary: None,
        })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        ChatEvent::Error {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }
}

impl ReasoningStep {
    pub fn turn(step_type: StepType, iteration: u32) -> Self {
        Self {
            step_type,
            iteration: Some(iteration),
            tool_name: None,
            status: None,
            detail: None,
        }
    }

    pub fn tool(
        step_type: StepType,
        iteration: u32,
        tool_name: impl Into<String>,
        status: StepStatus,
    ) -> Self {
        Self {
            step_type,
            iteration: Some(iteration),
            tool_name: Some(tool_name.into()),
            status: Some(status),
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_names_match_wire_contract() {
        assert_eq!(
            ChatEvent::ResponseMetadata {
                chat_id: "c".into(),
                message_id: None
            }
            .sse_name(),
            "ResponseMetadata"
        );
        assert_eq!(ChatEvent::End {}.sse_name(), "End");
        assert_eq!(ChatEvent::ResponseUpdate("x".into()).sse_name(), "ResponseUpdate");
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let ev = ChatEvent::ResponseMetadata {
            chat_id: "chat-1".into(),
            message_id: Some("msg-1".into()),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["chatId"], "chat-1");
        assert_eq!(json["messageId"], "msg-1");
    }

    #[test]
    fn reasoning_step_serializes_type_tag() {
        let ev = ChatEvent::reasoning_step(
            "Turn 0 started",
            ReasoningStep::turn(StepType::TurnStart, 0),
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["step"]["type"], "turn_start");
        assert_eq!(json["step"]["iteration"], 0);
    }

    #[test]
    fn citations_payload_maps_ordinals() {
        let payload = CitationsPayload {
            context_chunks: vec![],
            citation_map: [(1u32, 0usize)].into_iter().collect(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["citationMap"]["1"], 0);
    }
}
