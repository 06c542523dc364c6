//! Expectations — measurable criteria the planner attaches to a tool call
//! before execution, declared in `<expected_results>` blocks.

use serde::{Deserialize, Serialize};

/// One declared expectation, bound to a tool by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    pub tool_name: String,
    pub goal: String,
    pub success_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_condition: Option<String>,
}

impl Expectation {
    /// Schema check applied after deserialization. Entries that fail are
    /// dropped by the ledger with a warning.
    pub fn is_valid(&self) -> bool {
        !self.tool_name.trim().is_empty()
            && !self.goal.trim().is_empty()
            && !self.success_criteria.is_empty()
    }

    /// Render for review prompts.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.tool_name, self.goal);
        if !self.success_criteria.is_empty() {
            out.push_str(&format!(" (success: {})", self.success_criteria.join("; ")));
        }
        out
    }
}
