//! Plan data model — the goal and ordered sub-tasks written by `toDoWrite`.
//!
//! Transitions live in the gateway's plan state machine; this module only
//! defines the shapes and their wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub description: String,
    #[serde(default = "default_status")]
    pub status: SubTaskStatus,
    /// Tool names this task depends on. Empty = no tool needed.
    #[serde(default)]
    pub tools_required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_status() -> SubTaskStatus {
    SubTaskStatus::Pending
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
}

impl Plan {
    /// Render a compact snapshot for system prompts and review input.
    pub fn render(&self) -> String {
        let mut out = format!("Goal: {}\n", self.goal);
        for task in &self.sub_tasks {
            let marker = match task.status {
                SubTaskStatus::Pending => "[ ]",
                SubTaskStatus::InProgress => "[>]",
                SubTaskStatus::Completed => "[x]",
                SubTaskStatus::Failed => "[!]",
                SubTaskStatus::Blocked => "[b]",
            };
            out.push_str(&format!("{marker} {} — {}\n", task.id, task.description));
        }
        out
    }
}
