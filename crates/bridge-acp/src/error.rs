//! Error types for the ACP translator

use thiserror::Error;

/// Result type alias for translator operations
pub type Result<T> = std::result::Result<T, AcpError>;

/// Errors surfaced on the session-protocol side
#[derive(Error, Debug)]
pub enum AcpError {
    /// Gateway request failed
    #[error("Gateway request failed: {0}")]
    Gateway(String),

    /// Unknown session id
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Bridge-level failure
    #[error(transparent)]
    Bridge(#[from] bridge_mcp::BridgeError),
}
