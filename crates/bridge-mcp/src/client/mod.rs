//! MCP client implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::Result;

pub mod http;
pub mod stdio;

/// MCP client trait - abstracts over different transports
///
/// Note: All methods use &self (not &mut self) to enable use through Arc.
/// Implementations use interior mutability (Arc<Mutex<...>>) for state changes.
///
/// Every suspending method takes the caller's cancellation token; connect,
/// listing and invocation may run indefinitely otherwise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Establish the transport and perform the MCP initialize handshake
    async fn connect(&self, cancel: &CancellationToken) -> Result<()>;

    /// Check if client is connected
    fn is_connected(&self) -> bool;

    /// Disconnect from server
    async fn disconnect(&self) -> Result<()>;

    /// List available tools
    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDefinition>>;

    /// Call a tool
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolCallOutcome>;

    /// Get server info (from initialize response)
    async fn server_info(&self) -> Option<ServerInfo>;
}

/// MCP tool definition (from tools/list)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value, // JSON Schema
}

/// Raw result of a tools/call round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "isError")]
    pub is_error: Option<bool>,
}

/// One content block of a tool response
///
/// Deliberately an open shape rather than a closed tagged enum: servers may
/// emit content types this bridge does not know, and those must reach the
/// dispatcher's "unknown content type" branch instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

impl ContentBlock {
    /// Text block constructor, the common case in practice
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            mime_type: None,
            resource: None,
        }
    }
}

/// Embedded resource reference inside a content block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// MCP server info (from initialize)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
}

/// Type alias for Arc-wrapped MCP client
pub type ArcMcpClient = Arc<dyn McpClient>;
