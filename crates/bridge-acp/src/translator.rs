//! Session translator
//!
//! The session-protocol-facing layer: receives per-session MCP server
//! declarations on `session/new` / `session/load`, registers them with the
//! bridge's session pool (lazily - no connection is opened here), and
//! advertises which remote transports the bridge can speak.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use bridge_mcp::SessionPool;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::types::{
    AgentCapabilities, InitializeParams, InitializeResponse, LoadSessionParams, McpCapabilities,
    McpServerDeclaration, NewSessionParams, NewSessionResponse,
};

/// Per-session state the translator tracks
struct SessionState {
    cwd: PathBuf,
    declared_servers: Vec<String>,
}

/// Translates session-protocol lifecycle calls into bridge registrations
pub struct SessionTranslator {
    gateway: Arc<dyn Gateway>,
    pool: Arc<SessionPool>,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionTranslator {
    pub fn new(gateway: Arc<dyn Gateway>, pool: Arc<SessionPool>) -> Self {
        Self {
            gateway,
            pool,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Capability exchange
    ///
    /// Declares MCP tool-server integration with both streamable-HTTP and
    /// SSE remote transports. Opens no tool-server connections.
    pub fn initialize(&self, params: &InitializeParams) -> InitializeResponse {
        if let Some(client) = &params.client_info {
            debug!("Initializing for client: {} v{}", client.name, client.version);
        }

        InitializeResponse {
            protocol_version: params.protocol_version.clone(),
            agent_capabilities: AgentCapabilities {
                load_session: true,
                mcp_capabilities: McpCapabilities {
                    http: true,
                    sse: true,
                },
            },
        }
    }

    /// Create a new session, registering its declared MCP servers
    pub fn new_session(&self, params: &NewSessionParams) -> Result<NewSessionResponse> {
        let session_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Session {}: processing {} MCP servers",
            session_id,
            params.mcp_servers.len()
        );

        let declared = self.declared_and_defaults(&params.mcp_servers);
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionState {
                cwd: params.cwd.clone(),
                declared_servers: declared,
            },
        );

        Ok(NewSessionResponse { session_id })
    }

    /// Restore an existing session
    ///
    /// Declarations are handled exactly as in [`Self::new_session`]. The
    /// gateway's session list is consulted for reconciliation only: an id
    /// the gateway does not know is logged, not fatal - the MCP declaration
    /// is independent of whether prior transcript state exists.
    pub async fn load_session(&self, params: &LoadSessionParams) -> Result<()> {
        let response = self.gateway.request("sessions/list", json!({})).await?;
        let known: Vec<String> = response
            .get("sessions")
            .and_then(Value::as_array)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|s| {
                        s.get("sessionId")
                            .or_else(|| s.get("id"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if !known.contains(&params.session_id) {
            warn!(
                "Session {} not found on gateway; loading with declared servers anyway",
                params.session_id
            );
        }

        info!(
            "Session {}: processing {} MCP servers",
            params.session_id,
            params.mcp_servers.len()
        );

        let declared = self.declared_and_defaults(&params.mcp_servers);
        self.sessions.lock().unwrap().insert(
            params.session_id.clone(),
            SessionState {
                cwd: params.cwd.clone(),
                declared_servers: declared,
            },
        );

        Ok(())
    }

    /// Accepted declared servers plus the configured session defaults
    fn declared_and_defaults(&self, declarations: &[McpServerDeclaration]) -> Vec<String> {
        let mut declared = self.register_declarations(declarations);
        for name in self.pool.default_servers() {
            if !declared.contains(&name) && self.pool.is_configured(&name) {
                declared.push(name);
            }
        }
        declared
    }

    /// Register declared servers with the pool, skipping bad entries
    ///
    /// A malformed or duplicate declaration is logged and dropped; it never
    /// aborts session creation or loading. Returns the accepted names.
    fn register_declarations(&self, declarations: &[McpServerDeclaration]) -> Vec<String> {
        let mut declared: Vec<String> = Vec::new();

        for declaration in declarations {
            if declaration.name.is_empty() {
                warn!("Skipping MCP server declaration with empty name");
                continue;
            }
            if declared.contains(&declaration.name) {
                warn!(
                    "Skipping duplicate MCP server declaration: {}",
                    declaration.name
                );
                continue;
            }

            if let Some(config) = declaration.connection_override() {
                self.pool.register_server(&declaration.name, config);
            } else if !self.pool.is_configured(&declaration.name) {
                warn!(
                    "Skipping declared MCP server with no configuration: {}",
                    declaration.name
                );
                continue;
            }

            declared.push(declaration.name.clone());
        }

        declared
    }

    /// Names of the servers declared for a session
    pub fn declared_servers(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|state| state.declared_servers.clone())
            .unwrap_or_default()
    }

    /// Working directory a session was created with
    pub fn session_cwd(&self, session_id: &str) -> Option<PathBuf> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|state| state.cwd.clone())
    }
}
