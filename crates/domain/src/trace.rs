//! Run traces — the structured execution record persisted per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expectation::Expectation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// One executed tool call, as recorded by the post-execution hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub turn_number: u32,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_results: Option<Expectation>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub estimated_cost_usd: f64,
    pub started_at: DateTime<Utc>,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Stopped,
}

/// The per-run trace persisted through the chat store before exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub question: String,
    pub turn_count: u32,
    pub status: RunStatus,
    #[serde(default)]
    pub tool_records: Vec<ToolExecutionRecord>,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub created_at: DateTime<Utc>,
}
