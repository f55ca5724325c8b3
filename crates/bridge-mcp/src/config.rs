//! Configuration types for the tool-server bridge
//!
//! Supports project-level (`.mcp.json`) and user-level
//! (`~/.config/mcp-bridge/mcp.json`) configuration files with merge support.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level MCP configuration
///
/// # Example
///
/// ```json
/// {
///   "enabled": true,
///   "servers": {
///     "filesystem": {
///       "command": "npx",
///       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/workspace"]
///     },
///     "voice": {
///       "url": "http://localhost:8080/mcp"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    /// Enable/disable MCP support
    #[serde(default)]
    pub enabled: bool,

    /// Global timeout for MCP operations (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Server definitions, keyed by server name
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,

    /// Default servers to register for new sessions
    #[serde(default)]
    pub default_servers: Vec<String>,
}

/// Identity and connection recipe for one tool server
///
/// Exactly one of `url` (remote recipe) or `command` (subprocess recipe)
/// must be present. The shape is validated at session-creation time, not
/// at parse time; see [`McpServerConfig::recipe`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Command to execute (subprocess recipe)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variable overrides for the subprocess
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory (defaults to the current directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Server URL (remote recipe)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Timeout in milliseconds for server responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Whether calls block until the response by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Connection recipe selected from a server configuration
///
/// A closed set of transport variants, dispatched once at session-creation
/// time. The remote recipe wins when both are present.
#[derive(Debug)]
pub enum ServerRecipe<'a> {
    /// Streamable-HTTP connection to a remote server
    Remote { url: &'a str },

    /// Local subprocess speaking JSON-RPC over stdio
    Subprocess {
        command: &'a str,
        args: &'a [String],
        env: &'a HashMap<String, String>,
        cwd: Option<&'a Path>,
    },
}

impl McpServerConfig {
    /// Select the connection recipe for this server
    ///
    /// Fails when the configuration carries neither a remote address nor
    /// a command.
    pub fn recipe(&self) -> Result<ServerRecipe<'_>, BridgeError> {
        if let Some(url) = self.url.as_deref() {
            Ok(ServerRecipe::Remote { url })
        } else if let Some(command) = self.command.as_deref() {
            Ok(ServerRecipe::Subprocess {
                command,
                args: &self.args,
                env: &self.env,
                cwd: self.cwd.as_deref(),
            })
        } else {
            Err(BridgeError::Config(
                "server must specify either a remote address or a command".to_string(),
            ))
        }
    }
}

impl McpConfig {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {e}")))?;

        let mut config: McpConfig = serde_json::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config file: {e}")))?;

        config.resolve_env_vars()?;

        Ok(config)
    }

    /// Load merged configuration (user + project)
    ///
    /// Loads the user-level config from `~/.config/mcp-bridge/mcp.json` and
    /// merges it with the project-level config from `.mcp.json`. Project-level
    /// settings take precedence.
    pub fn load_merged() -> Result<Self, BridgeError> {
        let mut config = Self::load_user_config().unwrap_or_default();

        if let Ok(project_config) = Self::load_project_config() {
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load user-level config from `~/.config/mcp-bridge/mcp.json`
    pub fn load_user_config() -> Result<Self, BridgeError> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| BridgeError::Config("HOME or USERPROFILE not set".to_string()))?;

        let path = PathBuf::from(home)
            .join(".config")
            .join("mcp-bridge")
            .join("mcp.json");

        Self::from_file(path)
    }

    /// Load project-level config from `.mcp.json`
    pub fn load_project_config() -> Result<Self, BridgeError> {
        Self::from_file(".mcp.json")
    }

    /// Merge another config into this one
    ///
    /// The `other` config's values take precedence.
    pub fn merge(&mut self, other: McpConfig) {
        self.enabled = self.enabled || other.enabled;
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        self.servers.extend(other.servers);
        for name in other.default_servers {
            if !self.default_servers.contains(&name) {
                self.default_servers.push(name);
            }
        }
    }

    /// Resolve environment variable references in configuration
    ///
    /// Supports `${VAR}` and `$VAR` syntax in commands, arguments,
    /// environment values, working directories and URLs.
    pub fn resolve_env_vars(&mut self) -> Result<(), BridgeError> {
        for server in self.servers.values_mut() {
            if let Some(command) = &server.command {
                server.command = Some(resolve_env_string(command)?);
            }

            for arg in &mut server.args {
                *arg = resolve_env_string(arg)?;
            }

            for value in server.env.values_mut() {
                *value = resolve_env_string(value)?;
            }

            if let Some(path) = &server.cwd {
                let path_str = path.to_string_lossy().to_string();
                server.cwd = Some(PathBuf::from(resolve_env_string(&path_str)?));
            }

            if let Some(url) = &server.url {
                server.url = Some(resolve_env_string(url)?);
            }
        }

        Ok(())
    }
}

/// Resolve environment variable references in strings
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn resolve_env_string(s: &str) -> Result<String, BridgeError> {
    let mut result = s.to_string();

    // Pattern for ${VAR} syntax
    let re_braces = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| BridgeError::Config(e.to_string()))?;

    for cap in re_braces.captures_iter(s) {
        let var_name = &cap[1];
        let value = std::env::var(var_name).map_err(|_| {
            BridgeError::Config(format!("Environment variable not found: {var_name}"))
        })?;
        result = result.replace(&cap[0], &value);
    }

    // Pattern for $VAR syntax (without braces)
    let re_simple = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| BridgeError::Config(e.to_string()))?;

    for cap in re_simple.captures_iter(&result.clone()) {
        let var_name = &cap[1];
        let value = std::env::var(var_name).map_err(|_| {
            BridgeError::Config(format!("Environment variable not found: {var_name}"))
        })?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
