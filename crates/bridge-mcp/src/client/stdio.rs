//! Stdio transport MCP client
//!
//! Communicates with an MCP server via standard input/output by spawning
//! the server as a child process. Uses JSON-RPC 2.0 protocol over stdio.

use super::*;
use crate::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// MCP client using stdio transport
///
/// The child process inherits the bridge's environment, with config-supplied
/// variables layered on top, and runs in the configured working directory
/// (or the bridge's own when none is given).
pub struct StdioMcpClient {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,

    /// Child process handle
    child: Arc<Mutex<Option<Child>>>,

    /// Stdin writer
    stdin: Arc<Mutex<Option<ChildStdin>>>,

    /// Stdout reader
    stdout: Arc<Mutex<Option<BufReader<ChildStdout>>>>,

    /// Server info from initialization
    server_info: Arc<Mutex<Option<ServerInfo>>>,

    /// Connection state
    connected: Arc<Mutex<bool>>,

    /// Request ID counter
    request_id: Arc<Mutex<u64>>,
}

impl StdioMcpClient {
    /// Create a new stdio MCP client
    ///
    /// # Arguments
    ///
    /// * `command` - Command to execute
    /// * `args` - Command arguments
    /// * `env` - Environment variable overrides for the child
    /// * `cwd` - Working directory (optional)
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        Self {
            command,
            args,
            env,
            cwd,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            stdout: Arc::new(Mutex::new(None)),
            server_info: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(false)),
            request_id: Arc::new(Mutex::new(0)),
        }
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

    /// Write one JSON-RPC request line and read the matching response line
    async fn request_response(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_request_id().await;

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        debug!("Sending request: {}", method);

        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(BridgeError::NotConnected)?;

        let request_str = serde_json::to_string(&request)?;
        stdin
            .write_all(request_str.as_bytes())
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;

        // Read response
        let mut stdout = self.stdout.lock().await;
        let stdout = stdout.as_mut().ok_or(BridgeError::NotConnected)?;

        let mut line = String::new();
        stdout
            .read_line(&mut line)
            .await
            .map_err(|e| BridgeError::ConnectionFailed(e.to_string()))?;

        if line.is_empty() {
            return Err(BridgeError::ConnectionFailed(
                "Server closed connection".to_string(),
            ));
        }

        // A garbage line means the stream is desynchronized; that is a
        // transport failure, the session cannot be reused
        let response: Value = serde_json::from_str(&line)
            .map_err(|e| BridgeError::RequestFailed(format!("Malformed response line: {e}")))?;

        debug!("Received response for: {}", method);

        // Check for JSON-RPC error
        if let Some(error) = response.get("error") {
            return Err(BridgeError::RequestFailed(format!("{method}: {error}")));
        }

        // Return result
        response
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

        // Send initialized notification
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });

        let mut stdin = self.stdin.lock().await;
        if let Some(stdin) = stdin.as_mut() {
            let notification_str = serde_json::to_string(&notification)?;
            let _ = stdin.write_all(notification_str.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
            let _ = stdin.flush().await;
        }

        Ok(server_info)
    }
}

#[async_trait]
impl McpClient for StdioMcpClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        debug!("Starting MCP server: {} {:?}", self.command, self.args);

        // Spawn child process; it inherits our environment, then the
        // config-supplied variables override it
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::inherit());

        for (key, value) in &self.env {
            command.env(key, value);
        }

        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| BridgeError::ConnectionFailed(format!("Failed to spawn process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ConnectionFailed("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ConnectionFailed("Failed to get stdout".to_string()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout));
        *self.child.lock().await = Some(child);

        // Initialize protocol
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

        // Close pipes
        *self.stdin.lock().await = None;
        *self.stdout.lock().await = None;

        // Kill child process
        let mut child = self.child.lock().await;
        if let Some(child) = child.as_mut() {
            let _ = child.kill().await;
        }
        *child = None;

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

impl Drop for StdioMcpClient {
    fn drop(&mut self) {
        // Best effort cleanup - kill child process
        if let Ok(mut child) = self.child.try_lock() {
            if let Some(child) = child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_client_creation() {
        let client = StdioMcpClient::new(
            "echo".to_string(),
            vec!["hello".to_string()],
            HashMap::new(),
            None,
        );

        assert_eq!(client.command, "echo");
        assert_eq!(client.args, vec!["hello"]);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_call_before_connect_fails() {
        let client = StdioMcpClient::new("mcp-fs".to_string(), vec![], HashMap::new(), None);

        let result = client
            .call_tool("read_file", serde_json::json!({}), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BridgeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_garbage_response_line_is_a_request_failure() {
        // The child answers the initialize request with a non-JSON line;
        // that must surface as a request failure (which evicts the session),
        // not as a serialization error (which would not)
        let client = StdioMcpClient::new(
            "sh".to_string(),
            vec!["-c".to_string(), "echo not-json; cat >/dev/null".to_string()],
            HashMap::new(),
            None,
        );

        let result = client.connect(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_for_missing_binary() {
        let client = StdioMcpClient::new(
            "definitely-not-a-real-mcp-server".to_string(),
            vec![],
            HashMap::new(),
            None,
        );

        let result = client.connect(&CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
        assert!(!client.is_connected());
    }
}
