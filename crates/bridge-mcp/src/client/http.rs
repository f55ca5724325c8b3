//! Streamable-HTTP transport MCP client
//!
//! Communicates with a remote MCP server via HTTP POST requests using
//! JSON-RPC 2.0. The underlying HTTP client carries no per-request timeout:
//! tool exchanges (interactive voice-style tools in particular) may run
//! arbitrarily long, and cancellation is the caller's token, not the clock.

use super::*;
use crate::error::BridgeError;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// MCP client using streamable-HTTP transport
pub struct HttpMcpClient {
    url: Url,

    /// HTTP client, built without a request timeout
    http_client: reqwest::Client,

    /// Server info from initialization
    server_info: Arc<Mutex<Option<ServerInfo>>>,

    /// Connection state
    connected: Arc<Mutex<bool>>,

    /// Request ID counter
    request_id: Arc<Mutex<u64>>,
}

impl HttpMcpClient {
    /// Create a new HTTP MCP client
    ///
    /// Fails when `url` is not a valid absolute URL.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| BridgeError::Config(format!("Invalid server URL '{url}': {e}")))?;

        // No .timeout() on the builder: long-running calls are expected
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| BridgeError::ConnectionFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            http_client,
            server_info: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(false)),
            request_id: Arc::new(Mutex::new(0)),
        })
    }

    /// Get next request ID
    async fn next_request_id(&self) -> u64 {
        let mut id = self.request_id.lock().await;
        *id += 1;
        *id
    }

    /// Send a JSON-RPC request, racing the caller's cancellation token
    async fn send_request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        tokio::select! {
            // Cancellation wins over an in-flight response
            biased;
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
            res = self.request_response(method, params) => res,
        }
    }

    /// POST one JSON-RPC request and parse the response body
    async fn request_response(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_request_id().await;

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        debug!("Sending HTTP request to {}: {}", self.url, method);

        let response = self
            .http_client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::RequestFailed(format!(
                "HTTP {} for {}: {}",
                response.status(),
                method,
                response.text().await.unwrap_or_default()
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::RequestFailed(format!("Failed to parse response: {e}")))?;

        debug!("Received response for: {}", method);

        // Check for JSON-RPC error
        if let Some(error) = response_json.get("error") {
            return Err(BridgeError::RequestFailed(format!("{method}: {error}")));
        }

        // Return result
        response_json
            .get("result")
            .cloned()
            .ok_or_else(|| BridgeError::RequestFailed("No result in response".to_string()))
    }

    /// Send initialize request and the initialized notification
    async fn initialize(&self, cancel: &CancellationToken) -> Result<ServerInfo> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "clientInfo": {
                "name": "mcp-bridge",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.send_request("initialize", params, cancel).await?;

        let server_info = ServerInfo {
            name: result["serverInfo"]["name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            version: result["serverInfo"]["version"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            protocol_version: result["protocolVersion"]
                .as_str()
                .unwrap_or("2024-11-05")
                .to_string(),
        };

        info!(
            "Connected to MCP server: {} v{}",
            server_info.name, server_info.version
        );

        // Send initialized notification (fire and forget)
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });

        let _ = self
            .http_client
            .post(self.url.clone())
            .json(&notification)
            .send()
            .await;

        Ok(server_info)
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        debug!("Connecting to MCP server: {}", self.url);

        let server_info = self.initialize(cancel).await?;

        *self.server_info.lock().await = Some(server_info);
        *self.connected.lock().await = true;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        // Non-blocking check using try_lock
        self.connected.try_lock().map(|guard| *guard).unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting from MCP server");
        *self.connected.lock().await = false;
        Ok(())
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDefinition>> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let result = self
            .send_request("tools/list", serde_json::json!({}), cancel)
            .await?;

        let tools: Vec<ToolDefinition> = serde_json::from_value(result["tools"].clone())
            .map_err(|e| BridgeError::RequestFailed(format!("Failed to parse tools: {e}")))?;

        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<ToolCallOutcome> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let result = self.send_request("tools/call", params, cancel).await?;

        let outcome: ToolCallOutcome = serde_json::from_value(result)
            .map_err(|e| BridgeError::ToolCallFailed(format!("Failed to parse result: {e}")))?;

        Ok(outcome)
    }

    async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().await.clone()
    }
}
