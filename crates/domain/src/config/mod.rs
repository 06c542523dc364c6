mod agents;
mod connectors;
mod engine;
mod llm;
mod mcp;
mod server;

pub use agents::*;
pub use connectors::*;
pub use engine::*;
pub use llm::*;
pub use mcp::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The gateway's layered configuration. Deserialized from TOML by the
/// gateway binary; every section falls back to its defaults when absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub connectors: ConnectorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// MCP connector definitions.
    #[serde(default)]
    pub mcp: McpConfig,
    /// Delegatable custom agents (key = agent id, CUID format).
    #[serde(default)]
    pub agents: HashMap<String, CustomAgentConfig>,
}
