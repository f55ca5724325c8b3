//! ACP-facing session translator for the MCP tool-server bridge
//!
//! Sits between an editor speaking the agent-client session protocol and the
//! bridge's session pool:
//! - `initialize` advertises that tool-server integration is supported, and
//!   which remote transports (streamable HTTP, SSE) the bridge can speak
//! - `session/new` and `session/load` carry declarative lists of MCP servers;
//!   the translator registers them with the pool without opening connections
//! - existing session state is reconciled through a generic request channel
//!   to the owning gateway

pub mod error;
pub mod gateway;
pub mod translator;
pub mod types;

// Re-export commonly used types
pub use error::{AcpError, Result};
pub use gateway::Gateway;
pub use translator::SessionTranslator;
pub use types::{
    AgentCapabilities, InitializeParams, InitializeResponse, LoadSessionParams, McpCapabilities,
    McpServerDeclaration, NewSessionParams, NewSessionResponse,
};
