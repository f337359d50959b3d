//! Line-based duplex transports for MCP servers (C1 stdio framer, C2 SSE transport).
//!
//! A transport only moves opaque JSON-RPC lines; request/response correlation,
//! the handshake, and timeouts live one layer up in [`crate::mcp::client`].

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Lines must be accepted up to at least this size; configuring a smaller
/// limit is rejected at startup (§4.1 buffer discipline).
pub const MIN_LINE_BUFFER: usize = 1024 * 1024;

/// A duplex, line-oriented channel to one MCP server.
///
/// `send_line` writes one complete JSON-RPC text frame (without the trailing
/// newline; the transport appends it). `recv_line` returns the next complete
/// frame, or `None` once the peer has closed the channel.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send_line(&self, line: &str) -> Result<(), McpError>;
    async fn recv_line(&self) -> Result<Option<String>, McpError>;
    async fn close(&self) -> Result<(), McpError>;
}
