//! Outbound channel to the owning gateway
//!
//! The translator queries the gateway for existing session state during
//! `session/load`; it never owns session transcripts itself.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Request channel to the owning gateway process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Issue a request and wait for its response payload
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}
