//! Error types for the tool-server bridge

use thiserror::Error;

/// Errors that can occur inside the bridge
///
/// The call dispatcher converts every one of these into an error-shaped
/// `CallResult`; none of them crosses back into the agent framework.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// MCP support is not enabled in configuration
    #[error("MCP support is not enabled in configuration")]
    McpDisabled,

    /// Named server absent from configuration
    #[error("MCP server '{0}' not found in configuration")]
    ServerNotFound(String),

    /// Invalid server configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connect/handshake failure at the subprocess or HTTP layer
    #[error("MCP connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected to the MCP server
    #[error("Not connected to MCP server")]
    NotConnected,

    /// Request/response failure on an established transport
    #[error("MCP request failed: {0}")]
    RequestFailed(String),

    /// Tool invocation failure reported by the server
    #[error("MCP tool call failed: {0}")]
    ToolCallFailed(String),

    /// Malformed or unrecognized protocol payload
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// Call was cancelled by the caller-supplied token
    #[error("MCP call cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the session this error came from should be discarded
    ///
    /// Cancellation leaves the session pooled; genuine transport failures
    /// mean the next call needs a fresh connection.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::NotConnected
                | Self::RequestFailed(_)
                | Self::ToolCallFailed(_)
                | Self::Io(_)
        )
    }
}
