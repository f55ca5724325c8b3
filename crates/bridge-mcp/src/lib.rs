//! Tool-server session bridge
//!
//! Turns a declarative list of MCP server configurations into live, reusable,
//! fault-tolerant connections and exposes a uniform synchronous call contract
//! over them, regardless of transport:
//! - Local servers are spawned as subprocesses speaking JSON-RPC over stdio
//! - Remote servers are reached over streamable HTTP with no request timeout
//! - Sessions are pooled per server name, reused while valid, and evicted
//!   when idle or broken
//! - Every call resolves into a normalized [`dispatch::CallResult`]; failures
//!   never escape the dispatcher
//!
//! # Example
//!
//! ```no_run
//! use bridge_mcp::config::McpConfig;
//! use bridge_mcp::dispatch::{CallRequest, Dispatcher};
//! use bridge_mcp::pool::SessionPool;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration
//! let config = McpConfig::load_merged()?;
//!
//! // Pool lives for the agent session; shut it down at the end
//! let pool = Arc::new(SessionPool::new(config));
//! pool.spawn_reaper();
//!
//! let dispatcher = Dispatcher::new(Arc::clone(&pool));
//! let request = CallRequest {
//!     server: "filesystem".to_string(),
//!     tool: "read_file".to_string(),
//!     args: serde_json::Map::new(),
//!     blocking: true,
//! };
//!
//! let result = dispatcher.invoke(&request, &CancellationToken::new()).await;
//! println!("{:?}", result.details);
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod transport;

// Re-export commonly used types
pub use client::{ArcMcpClient, McpClient};
pub use config::{McpConfig, McpServerConfig};
pub use dispatch::{CallRequest, CallResult, Dispatcher};
pub use error::BridgeError;
pub use pool::{PoolOptions, Session, SessionPool};
pub use transport::{Connector, TransportSelector};

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
