//! MCP manager — holds all connector connections and orchestrates tool
//! discovery and dispatch.

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::{self, CallToolResult, McpToolDef};
use crate::transport::{StdioConnection, TransportError};
use cairn_domain::config::{McpConfig, McpConnectorConfig};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("unknown connector: {0}")]
    UnknownConnector(String),

    #[error("connector {0} is down")]
    ConnectorDown(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpConnector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One connected MCP server.
pub struct McpConnector {
    pub id: String,
    pub name: String,
    /// Tools discovered via `tools/list` at initialization.
    pub tools: Vec<McpToolDef>,
    conn: StdioConnection,
}

impl McpConnector {
    /// Launch the server, perform the MCP handshake, and discover tools.
    async fn initialize(config: &McpConnectorConfig) -> Result<Self, McpError> {
        let conn = StdioConnection::open(config)?;

        conn.request("initialize", Some(protocol::initialize_params()))
            .await?;
        conn.notify("notifications/initialized").await?;

        let tools = match conn.request("tools/list", None).await {
            Ok(result) => {
                let listed = result.get("tools").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<Vec<McpToolDef>>(listed) {
                    Ok(tools) => tools,
                    Err(e) => {
                        tracing::warn!(
                            connector_id = %config.id,
                            error = %e,
                            "failed to parse tools/list result"
                        );
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    connector_id = %config.id,
                    error = %e,
                    "tools/list failed, connector will have no tools"
                );
                Vec::new()
            }
        };

        tracing::info!(
            connector_id = %config.id,
            tool_count = tools.len(),
            "MCP connector initialized"
        );

        Ok(Self {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            tools,
            conn,
        })
    }

    /// Call a tool on this connector.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        if !self.conn.is_alive() {
            return Err(McpError::ConnectorDown(self.id.clone()));
        }
        let result = self
            .conn
            .request(
                "tools/call",
                Some(protocol::call_tool_params(tool_name, arguments)),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all connector connections, keyed by connector id.
pub struct McpManager {
    connectors: HashMap<String, McpConnector>,
}

impl McpManager {
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Initialize every enabled connector. Failures are logged and skipped
    /// so one broken connector does not take down the gateway.
    pub async fn from_config(config: &McpConfig) -> Self {
        let mut connectors = HashMap::new();
        for cc in config.connectors.iter().filter(|c| c.enabled) {
            match McpConnector::initialize(cc).await {
                Ok(connector) => {
                    connectors.insert(cc.id.clone(), connector);
                }
                Err(e) => {
                    tracing::warn!(
                        connector_id = %cc.id,
                        error = %e,
                        "failed to initialize MCP connector, skipping"
                    );
                }
            }
        }
        Self { connectors }
    }

    pub fn get(&self, connector_id: &str) -> Option<&McpConnector> {
        self.connectors.get(connector_id)
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Per-connector tool counts, used by the registry's tool budget.
    pub fn tool_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<_> = self
            .connectors
            .values()
            .map(|c| (c.id.clone(), c.tools.len()))
            .collect();
        counts.sort();
        counts
    }

    /// All `(connector_id, tool)` pairs across connectors.
    pub fn list_tools(&self) -> Vec<(&str, &McpToolDef)> {
        let mut out = Vec::new();
        let mut ids: Vec<_> = self.connectors.keys().collect();
        ids.sort();
        for id in ids {
            for tool in &self.connectors[id].tools {
                out.push((id.as_str(), tool));
            }
        }
        out
    }

    /// Call a tool on a specific connector.
    pub async fn call_tool(
        &self,
        connector_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let connector = self
            .connectors
            .get(connector_id)
            .ok_or_else(|| McpError::UnknownConnector(connector_id.to_string()))?;
        connector.call_tool(tool_name, arguments).await
    }

    /// Shut down all connector transports.
    pub async fn shutdown(&self) {
        for connector in self.connectors.values() {
            connector.conn.shutdown().await;
        }
    }
}
