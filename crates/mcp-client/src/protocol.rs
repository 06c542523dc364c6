//! Wire format for MCP connectors.
//!
//! Frames are newline-delimited JSON-RPC 2.0. Outgoing frames are built
//! by the `*_frame` functions; everything a connector writes back is
//! parsed into [`Inbound`] and classified, since replies, server
//! notifications, and log noise all share the same pipe.

use serde::Deserialize;
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outgoing frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a request frame; the connector must answer under `id`.
pub fn request_frame(id: u64, method: &str, params: Option<Value>) -> String {
    let mut frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if let Some(params) = params {
        frame["params"] = params;
    }
    frame.to_string()
}

/// Serialize a notification frame (fire-and-forget, no id).
pub fn notification_frame(method: &str) -> String {
    json!({ "jsonrpc": "2.0", "method": method }).to_string()
}

/// Parameters for the `initialize` handshake.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "cairn",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Parameters for a `tools/call` request.
pub fn call_tool_params(tool_name: &str, arguments: Value) -> Value {
    json!({
        "name": tool_name,
        "arguments": arguments,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incoming frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any JSON object a connector may write on stdout.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// What an inbound frame turned out to be.
#[derive(Debug)]
pub enum InboundKind {
    /// A reply to one of our requests.
    Reply {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// A server-initiated notification.
    Notification { method: String },
    /// A server-initiated request or an unrecognizable frame. We act as
    /// a pure client, so these are dropped.
    Unsupported,
}

impl Inbound {
    pub fn classify(self) -> InboundKind {
        match (self.id, self.method) {
            // A method alongside an id is a request aimed at us.
            (Some(_), Some(_)) => InboundKind::Unsupported,
            (Some(id), None) => InboundKind::Reply {
                id,
                outcome: match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                },
            },
            (None, Some(method)) => InboundKind::Notification { method },
            (None, None) => InboundKind::Unsupported,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool definition from `tools/list`.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// A single content item in a `tools/call` result.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CallToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

/// The result payload of `tools/call`.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<CallToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenate the textual content items.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
