//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! Lightweight config structs used to deserialize the `[mcp]` section.
//! The actual MCP client logic lives in the `cairn-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// Configured MCP connectors.
    #[serde(default)]
    pub connectors: Vec<McpConnectorConfig>,
}

/// One MCP connector (a stdio-spawned server process).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConnectorConfig {
    /// Unique connector id, referenced by `toolsList` request entries.
    pub id: String,
    /// Human-readable name, surfaced when the connector is promoted to a
    /// virtual agent.
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

fn d_true() -> bool {
    true
}
