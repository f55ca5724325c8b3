//! Transport selection
//!
//! Turns a server configuration into a connected client: remote recipes get
//! the streamable-HTTP transport, subprocess recipes get stdio. The choice
//! is made once, at session-creation time, from the configuration shape.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::client::ArcMcpClient;
use crate::client::http::HttpMcpClient;
use crate::client::stdio::StdioMcpClient;
use crate::config::{McpServerConfig, ServerRecipe};

/// Builds connected clients for the session pool
///
/// The pool only ever sees this trait; tests substitute a mock to observe
/// connection attempts without spawning anything.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build, connect and handshake a client for one server
    async fn connect(
        &self,
        server: &str,
        config: &McpServerConfig,
        cancel: &CancellationToken,
    ) -> Result<ArcMcpClient>;
}

/// Production connector: picks the transport from the config shape
#[derive(Debug, Default)]
pub struct TransportSelector;

#[async_trait]
impl Connector for TransportSelector {
    async fn connect(
        &self,
        server: &str,
        config: &McpServerConfig,
        cancel: &CancellationToken,
    ) -> Result<ArcMcpClient> {
        let client: ArcMcpClient = match config.recipe()? {
            ServerRecipe::Remote { url } => {
                info!(
                    "Connecting to MCP server via HTTP: {} (per-request timeout disabled)",
                    url
                );
                std::sync::Arc::new(HttpMcpClient::new(url)?)
            }
            ServerRecipe::Subprocess {
                command,
                args,
                env,
                cwd,
            } => {
                info!(
                    "Connecting to MCP server via stdio: {} {}",
                    command,
                    args.join(" ")
                );
                std::sync::Arc::new(StdioMcpClient::new(
                    command.to_string(),
                    args.to_vec(),
                    env.clone(),
                    cwd.map(std::path::Path::to_path_buf),
                ))
            }
        };

        client.connect(cancel).await?;
        info!("Connected to MCP server: {}", server);

        // List available tools (diagnostic visibility only, never cached)
        let tools = client.list_tools(cancel).await?;
        info!(
            "Available tools on {}: {}",
            server,
            tools
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[tokio::test]
    async fn test_config_without_recipe_is_rejected() {
        let selector = TransportSelector;
        let config = McpServerConfig::default();

        let result = selector
            .connect("bad", &config, &CancellationToken::new())
            .await;

        match result {
            Err(BridgeError::Config(msg)) => {
                assert!(msg.contains("either a remote address or a command"));
            }
            _ => panic!("Expected config error"),
        }
    }

    #[tokio::test]
    async fn test_subprocess_spawn_failure_surfaces() {
        let selector = TransportSelector;
        let config = McpServerConfig {
            command: Some("definitely-not-a-real-mcp-server".to_string()),
            ..Default::default()
        };

        let result = selector
            .connect("ghost", &config, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
    }
}
