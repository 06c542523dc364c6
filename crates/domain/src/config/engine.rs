use serde::{Deserialize, Serialize};

/// Hard limits and budgets for the turn-structured engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum LLM turns per run before the run errors out.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Maximum turns granted to a delegated sub-agent run.
    #[serde(default = "d_delegation_turns")]
    pub delegation_max_turns: u32,
    /// Whether `list_custom_agents` / `run_public_agent` are exposed.
    #[serde(default = "d_true")]
    pub delegation_enabled: bool,
    /// Ceiling on directly-exposed tools before MCP connectors are
    /// re-classified as virtual agents.
    #[serde(default = "d_tool_budget")]
    pub tool_budget: usize,
    /// Failures per tool before further calls are blocked for the run.
    #[serde(default = "d_failure_budget")]
    pub failure_budget: u32,
    /// Window for duplicate tool-call suppression.
    #[serde(default = "d_dup_window")]
    pub duplicate_window_secs: u64,
    /// Maximum images handed to the final synthesizer.
    #[serde(default = "d_max_images")]
    pub max_images: usize,
    /// Fragments included in a review prompt (most recent first).
    #[serde(default = "d_review_fragments")]
    pub review_fragment_limit: usize,
    /// MCP tools a virtual agent may select per invocation.
    #[serde(default = "d_mcp_select")]
    pub mcp_select_max: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            delegation_max_turns: d_delegation_turns(),
            delegation_enabled: true,
            tool_budget: d_tool_budget(),
            failure_budget: d_failure_budget(),
            duplicate_window_secs: d_dup_window(),
            max_images: d_max_images(),
            review_fragment_limit: d_review_fragments(),
            mcp_select_max: d_mcp_select(),
        }
    }
}

fn d_max_turns() -> u32 {
    12
}
fn d_delegation_turns() -> u32 {
    25
}
fn d_true() -> bool {
    true
}
fn d_tool_budget() -> usize {
    30
}
fn d_failure_budget() -> u32 {
    3
}
fn d_dup_window() -> u64 {
    60
}
fn d_max_images() -> usize {
    8
}
fn d_review_fragments() -> usize {
    40
}
fn d_mcp_select() -> usize {
    3
}
