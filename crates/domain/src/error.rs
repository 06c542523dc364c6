/// Shared error type used across all Cairn crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("MCP: {0}")]
    Mcp(String),

    #[error("max turns exceeded ({0})")]
    MaxTurnsExceeded(u32),

    #[error("run stopped")]
    Stopped,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
