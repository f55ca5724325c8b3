//! Call dispatcher
//!
//! Executes one tool invocation against a pooled session and normalizes the
//! heterogeneous response payload into a uniform result shape. This is the
//! sole error boundary: `invoke` never fails, every failure becomes an
//! error-shaped [`CallResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ToolCallOutcome;
use crate::pool::SessionPool;

/// One tool invocation: stateless, constructed per call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// MCP server name from configuration
    pub server: String,

    /// Tool name to call on the MCP server
    pub tool: String,

    /// Arguments to pass to the MCP tool
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,

    /// Whether to block until response (default: true)
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

/// Normalized call outcome
///
/// Either one rendered content item plus structured details, or an error
/// descriptor (`details.status == "error"`) carrying the failure message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub content: Vec<RenderedContent>,
    pub details: Value,
}

/// Displayable content item of a call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RenderedContent {
    Text { text: String },
}

impl CallResult {
    fn text(text: impl Into<String>, details: Value) -> Self {
        Self {
            content: vec![RenderedContent::Text { text: text.into() }],
            details,
        }
    }

    fn error(message: impl Into<String>, tool: &str, server: &str) -> Self {
        let message = message.into();
        Self {
            content: vec![RenderedContent::Text {
                text: format!("MCP tool call failed: {message}"),
            }],
            details: json!({
                "status": "error",
                "tool": tool,
                "server": server,
                "error": message,
            }),
        }
    }

    /// Whether this result describes a failed call
    pub fn is_error(&self) -> bool {
        self.details.get("status").and_then(Value::as_str) == Some("error")
    }
}

/// Dispatches tool calls over the session pool
pub struct Dispatcher {
    pool: Arc<SessionPool>,
}

impl Dispatcher {
    /// Tool name the agent framework registers this dispatcher under
    pub const TOOL_NAME: &'static str = "mcp_call";

    /// Tool description for the agent framework
    pub const DESCRIPTION: &'static str =
        "Call a tool on any configured MCP server (supports synchronous blocking)";

    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    /// JSON schema of the call parameters
    pub fn input_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": {
                    "type": "string",
                    "description": "MCP server name from configuration"
                },
                "tool": {
                    "type": "string",
                    "description": "Tool name to call on the MCP server"
                },
                "args": {
                    "type": "object",
                    "description": "Arguments to pass to the MCP tool"
                },
                "blocking": {
                    "type": "boolean",
                    "default": true,
                    "description": "Whether to block until response (default: true)"
                }
            },
            "required": ["server", "tool"]
        })
    }

    /// Execute one tool call
    ///
    /// Acquires a pooled session (connecting on first use), issues the call,
    /// and normalizes the response. A transport failure evicts the session so
    /// the next call gets a fresh connection; cancellation resolves into an
    /// error result without evicting anything.
    pub async fn invoke(&self, request: &CallRequest, cancel: &CancellationToken) -> CallResult {
        info!(
            "Calling MCP tool: {} on {} (blocking: {})",
            request.tool, request.server, request.blocking
        );

        let session = match self.pool.acquire(&request.server, cancel).await {
            Ok(session) => session,
            Err(e) => {
                // No session was created, so there is nothing to evict
                warn!("MCP session acquire failed for {}: {}", request.server, e);
                return CallResult::error(e.to_string(), &request.tool, &request.server);
            }
        };

        let outcome = session
            .client()
            .call_tool(
                &request.tool,
                Value::Object(request.args.clone()),
                cancel,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                debug!(
                    "MCP tool {} completed. Content blocks: {}",
                    request.tool,
                    outcome.content.len()
                );
                // Call activity counts as use
                self.pool.touch(&request.server).await;
                normalize(&request.server, &request.tool, &outcome)
            }
            Err(e) => {
                warn!("MCP tool call failed: {}", e);
                if e.is_transport_failure() {
                    self.pool.evict(&request.server).await;
                }
                CallResult::error(e.to_string(), &request.tool, &request.server)
            }
        }
    }
}

/// Normalize a tool response into one rendered content item
///
/// Only the first content element is surfaced; later elements are dropped.
/// Deliberate simplification, not a protocol limitation.
fn normalize(server: &str, tool: &str, outcome: &ToolCallOutcome) -> CallResult {
    let Some(first) = outcome.content.first() else {
        return CallResult::text(
            "MCP tool returned empty result",
            json!({ "tool": tool, "server": server, "result": "empty" }),
        );
    };

    match first.kind.as_str() {
        "text" => {
            let text = first.text.clone().unwrap_or_else(|| "No text content".to_string());
            CallResult::text(
                text,
                json!({ "tool": tool, "server": server, "result": first.text.clone() }),
            )
        }
        "image" => {
            let mime_type = first.mime_type.as_deref().unwrap_or("unknown");
            CallResult::text(
                format!("Image content: {mime_type}"),
                json!({ "tool": tool, "server": server, "result": "image", "mimeType": mime_type }),
            )
        }
        "resource" => {
            let uri = first
                .resource
                .as_ref()
                .and_then(|r| r.uri.as_deref())
                .unwrap_or("unknown");
            CallResult::text(
                format!("Resource: {uri}"),
                json!({ "tool": tool, "server": server, "result": "resource", "uri": uri }),
            )
        }
        other => CallResult::text(
            format!("Unknown content type: {other}"),
            json!({ "tool": tool, "server": server, "result": "unknown" }),
        ),
    }
}
