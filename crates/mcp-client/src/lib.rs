//! MCP (Model Context Protocol) client for the Cairn engine.
//!
//! Connectors are stdio-spawned MCP servers. The [`McpManager`] owns one
//! connection per configured connector, discovers tools at startup, and
//! dispatches `tools/call` requests.

pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{McpError, McpManager};
pub use protocol::{CallToolResult, McpToolDef};
