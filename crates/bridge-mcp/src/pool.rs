//! Session pool for MCP server connections
//!
//! Owns every live connection, keyed by server name. Sessions are created
//! lazily on first acquire, reused while valid, and evicted when idle or
//! broken. The pool is an explicit owned resource: construct it at
//! agent-session start, call [`SessionPool::shutdown`] at the end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::client::ArcMcpClient;
use crate::config::{McpConfig, McpServerConfig};
use crate::error::BridgeError;
use crate::transport::{Connector, TransportSelector};

/// Reaper timing knobs
///
/// Defaults are a 5 minute sweep over sessions idle for 30 minutes or more.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// How often the background reaper scans the pool
    pub reap_interval: Duration,

    /// Idle age past which a session is closed and removed
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// A live, reusable connection to one MCP server
///
/// The pool is the sole owner; `last_used` only moves forward while the
/// session is pooled.
pub struct Session {
    server: String,
    client: ArcMcpClient,
    last_used: StdMutex<Instant>,
}

impl Session {
    fn new(server: &str, client: ArcMcpClient) -> Self {
        Self {
            server: server.to_string(),
            client,
            last_used: StdMutex::new(Instant::now()),
        }
    }

    /// The server name this session belongs to
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The protocol client handle
    pub fn client(&self) -> &ArcMcpClient {
        &self.client
    }

    fn touch(&self) {
        let mut last_used = self.last_used.lock().unwrap();
        let now = Instant::now();
        // Monotonically non-decreasing, even if callers race
        if now > *last_used {
            *last_used = now;
        }
    }

    fn idle_since(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock().unwrap())
    }
}

/// Entry per server name; the cell doubles as the in-flight placeholder
/// that gives acquire its single-flight-per-key property.
type SessionCell = Arc<OnceCell<Arc<Session>>>;

/// Pool of live MCP sessions, keyed by server name
pub struct SessionPool {
    /// Server configurations; translators register declared servers here
    config: RwLock<McpConfig>,

    /// Live and in-flight sessions. All mutation funnels through the pool's
    /// own methods; nothing outside this module touches the map.
    sessions: Mutex<HashMap<String, SessionCell>>,

    connector: Arc<dyn Connector>,
    options: PoolOptions,
    reaper: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionPool {
    /// Create a pool over the given configuration with default transports
    /// and reaper timing
    pub fn new(config: McpConfig) -> Self {
        Self::with_connector(config, Arc::new(TransportSelector), PoolOptions::default())
    }

    /// Create a pool with a custom connector and timing
    ///
    /// The connector seam is what tests use to observe connection attempts.
    pub fn with_connector(
        config: McpConfig,
        connector: Arc<dyn Connector>,
        options: PoolOptions,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            sessions: Mutex::new(HashMap::new()),
            connector,
            options,
            reaper: StdMutex::new(None),
        }
    }

    /// Get the pooled session for `server`, connecting if necessary
    ///
    /// Reuse refreshes `last_used`. Concurrent acquires for the same unseen
    /// name share a single connection attempt; acquires for different names
    /// proceed independently.
    pub async fn acquire(
        &self,
        server: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Session>> {
        // Reuse path, or register the in-flight placeholder before any
        // suspension so a concurrent acquire finds it
        let cell: SessionCell = {
            let mut sessions = self.sessions.lock().await;
            if let Some(cell) = sessions.get(server) {
                if let Some(session) = cell.get() {
                    session.touch();
                    return Ok(Arc::clone(session));
                }
                Arc::clone(cell)
            } else {
                let cell: SessionCell = Arc::new(OnceCell::new());
                sessions.insert(server.to_string(), Arc::clone(&cell));
                cell
            }
        };

        let init = cell
            .get_or_try_init(|| async {
                let config = self.server_config(server)?;
                let client = self.connector.connect(server, &config, cancel).await?;
                Ok::<_, BridgeError>(Arc::new(Session::new(server, client)))
            })
            .await;

        match init {
            Ok(session) => {
                session.touch();
                Ok(Arc::clone(session))
            }
            Err(e) => {
                // Drop the placeholder so the next acquire retries cleanly.
                // Another acquirer may still be connecting on this cell (the
                // map and this frame account for two strong references); only
                // the last holder may clear it, otherwise a late success
                // would land in a cell the pool no longer owns.
                let mut sessions = self.sessions.lock().await;
                if let Some(existing) = sessions.get(server) {
                    if Arc::ptr_eq(existing, &cell)
                        && existing.get().is_none()
                        && Arc::strong_count(existing) <= 2
                    {
                        sessions.remove(server);
                    }
                }
                Err(e)
            }
        }
    }

    /// Look up the configuration for a named server
    fn server_config(&self, server: &str) -> Result<McpServerConfig> {
        let config = self.config.read().unwrap();
        if !config.enabled {
            return Err(BridgeError::McpDisabled);
        }
        config
            .servers
            .get(server)
            .cloned()
            .ok_or_else(|| BridgeError::ServerNotFound(server.to_string()))
    }

    /// Register (or replace) a server configuration
    ///
    /// Used by the session translator for declared servers; opens no
    /// connection.
    pub fn register_server(&self, name: &str, server: McpServerConfig) {
        let mut config = self.config.write().unwrap();
        debug!("Registering MCP server configuration: {}", name);
        config.servers.insert(name.to_string(), server);
    }

    /// Whether a server of this name is configured
    pub fn is_configured(&self, name: &str) -> bool {
        self.config.read().unwrap().servers.contains_key(name)
    }

    /// Server names configured as defaults for every new session
    pub fn default_servers(&self) -> Vec<String> {
        self.config.read().unwrap().default_servers.clone()
    }

    /// Refresh a pooled session's `last_used`
    ///
    /// Call activity counts as use; the dispatcher calls this after each
    /// successful tool call.
    pub async fn touch(&self, server: &str) {
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(server).and_then(|cell| cell.get()) {
            session.touch();
        }
    }

    /// Force-close and remove a session regardless of age
    ///
    /// Used after a failed call so the next acquire builds a fresh
    /// connection. Close errors are swallowed.
    pub async fn evict(&self, server: &str) {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(server)
        };

        if let Some(session) = removed.and_then(|cell| cell.get().cloned()) {
            info!("Evicting MCP session: {}", server);
            if let Err(e) = session.client.disconnect().await {
                debug!("Ignoring close error for {}: {}", server, e);
            }
        }
    }

    /// Close and remove every session idle past the configured threshold
    ///
    /// Close failures are swallowed; eviction never raises.
    pub async fn reap_idle(&self, now: Instant) {
        let stale: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, cell)| {
                    cell.get()
                        .is_some_and(|s| s.idle_since(now) >= self.options.idle_timeout)
                })
                .map(|(name, _)| name.clone())
                .collect();

            expired
                .iter()
                .filter_map(|name| sessions.remove(name).and_then(|cell| cell.get().cloned()))
                .collect()
        };

        for session in stale {
            debug!("Reaping idle MCP session: {}", session.server);
            if let Err(e) = session.client.disconnect().await {
                debug!("Ignoring close error for {}: {}", session.server, e);
            }
        }
    }

    /// Start the background reaper task
    ///
    /// Idempotent; the task holds only a weak reference so dropping the
    /// pool stops it.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let mut guard = self.reaper.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let pool = Arc::downgrade(self);
        let interval = self.options.reap_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval fires immediately once; skip that tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                pool.reap_idle(Instant::now()).await;
            }
        }));
    }

    /// Number of live (connected) sessions in the pool
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Stop the reaper and close every session
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }

        let drained: Vec<SessionCell> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, cell)| cell).collect()
        };

        for session in drained.iter().filter_map(|cell| cell.get()) {
            info!("Disconnecting from MCP server: {}", session.server);
            if let Err(e) = session.client.disconnect().await {
                warn!("Error disconnecting from {}: {}", session.server, e);
            }
        }

        info!("All MCP sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{McpClient, ServerInfo, ToolCallOutcome, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client stub that only counts disconnects
    struct StubClient {
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl McpClient for StubClient {
        async fn connect(&self, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDefinition>> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
            _cancel: &CancellationToken,
        ) -> Result<ToolCallOutcome> {
            Ok(ToolCallOutcome {
                content: vec![],
                is_error: None,
            })
        }

        async fn server_info(&self) -> Option<ServerInfo> {
            None
        }
    }

    /// Connector that counts attempts and optionally stalls to widen the
    /// single-flight window
    struct CountingConnector {
        attempts: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        connect_delay: Duration,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(
            &self,
            _server: &str,
            _config: &McpServerConfig,
            _cancel: &CancellationToken,
        ) -> Result<ArcMcpClient> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            Ok(Arc::new(StubClient {
                disconnects: Arc::clone(&self.disconnects),
            }))
        }
    }

    struct Fixture {
        pool: Arc<SessionPool>,
        attempts: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    fn fixture(options: PoolOptions, connect_delay: Duration) -> Fixture {
        let mut config = McpConfig {
            enabled: true,
            ..Default::default()
        };
        config.servers.insert(
            "s1".to_string(),
            McpServerConfig {
                command: Some("mcp-one".to_string()),
                ..Default::default()
            },
        );
        config.servers.insert(
            "s2".to_string(),
            McpServerConfig {
                command: Some("mcp-two".to_string()),
                ..Default::default()
            },
        );

        let attempts = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(CountingConnector {
            attempts: Arc::clone(&attempts),
            disconnects: Arc::clone(&disconnects),
            connect_delay,
        });

        Fixture {
            pool: Arc::new(SessionPool::with_connector(config, connector, options)),
            attempts,
            disconnects,
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_session() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let first = f.pool.acquire("s1", &cancel).await.unwrap();
        let second = f.pool.acquire("s1", &cancel).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(f.pool.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_acquire_unknown_server() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);

        let result = f.pool.acquire("nope", &CancellationToken::new()).await;

        match result {
            Err(BridgeError::ServerNotFound(name)) => assert_eq!(name, "nope"),
            _ => panic!("Expected ServerNotFound"),
        }
        assert_eq!(f.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(f.pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_acquire_when_disabled() {
        let pool = SessionPool::with_connector(
            McpConfig::default(),
            Arc::new(CountingConnector {
                attempts: Arc::new(AtomicUsize::new(0)),
                disconnects: Arc::new(AtomicUsize::new(0)),
                connect_delay: Duration::ZERO,
            }),
            PoolOptions::default(),
        );

        let result = pool.acquire("s1", &CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::McpDisabled)));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_connection() {
        let f = fixture(PoolOptions::default(), Duration::from_millis(20));
        let cancel = CancellationToken::new();

        let acquires = (0..8).map(|_| f.pool.acquire("s1", &cancel));
        let sessions = futures::future::join_all(acquires).await;

        let first = sessions[0].as_ref().unwrap();
        for session in &sessions {
            assert!(Arc::ptr_eq(first, session.as_ref().unwrap()));
        }
        assert_eq!(f.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquires_for_different_names_are_independent() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let s1 = f.pool.acquire("s1", &cancel).await.unwrap();
        let s2 = f.pool.acquire("s2", &cancel).await.unwrap();

        assert_eq!(s1.server(), "s1");
        assert_eq!(s2.server(), "s2");
        assert_eq!(f.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(f.pool.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_evict_then_reacquire_builds_fresh_session() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let first = f.pool.acquire("s1", &cancel).await.unwrap();
        f.pool.evict("s1").await;

        assert_eq!(f.pool.session_count().await, 0);
        assert_eq!(f.disconnects.load(Ordering::SeqCst), 1);

        let second = f.pool.acquire("s1", &cancel).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(f.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_clears_placeholder() {
        struct FailingConnector;

        #[async_trait]
        impl Connector for FailingConnector {
            async fn connect(
                &self,
                _server: &str,
                _config: &McpServerConfig,
                _cancel: &CancellationToken,
            ) -> Result<ArcMcpClient> {
                Err(BridgeError::ConnectionFailed("boom".to_string()))
            }
        }

        let mut config = McpConfig {
            enabled: true,
            ..Default::default()
        };
        config
            .servers
            .insert("s1".to_string(), McpServerConfig {
                command: Some("mcp-one".to_string()),
                ..Default::default()
            });

        let pool =
            SessionPool::with_connector(config, Arc::new(FailingConnector), PoolOptions::default());

        let result = pool.acquire("s1", &CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));

        // The pending placeholder must not linger
        let sessions = pool.sessions.lock().await;
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_racing_acquires_survive_failed_first_connect() {
        /// Fails the first connection attempt after a short stall, then
        /// succeeds
        struct FlakyConnector {
            attempts: Arc<AtomicUsize>,
            disconnects: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Connector for FlakyConnector {
            async fn connect(
                &self,
                _server: &str,
                _config: &McpServerConfig,
                _cancel: &CancellationToken,
            ) -> Result<ArcMcpClient> {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if attempt == 0 {
                    Err(BridgeError::ConnectionFailed("first attempt".to_string()))
                } else {
                    Ok(Arc::new(StubClient {
                        disconnects: Arc::clone(&self.disconnects),
                    }))
                }
            }
        }

        let mut config = McpConfig {
            enabled: true,
            ..Default::default()
        };
        config.servers.insert(
            "s1".to_string(),
            McpServerConfig {
                command: Some("mcp-one".to_string()),
                ..Default::default()
            },
        );

        let attempts = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(SessionPool::with_connector(
            config,
            Arc::new(FlakyConnector {
                attempts: Arc::clone(&attempts),
                disconnects: Arc::clone(&disconnects),
            }),
            PoolOptions::default(),
        ));
        let cancel = CancellationToken::new();

        // Two acquires race on the same unseen name; the first connection
        // attempt fails while the second acquirer is still waiting on the
        // shared cell, and that second attempt succeeds
        let (a, b) = tokio::join!(pool.acquire("s1", &cancel), pool.acquire("s1", &cancel));
        let survivor = match (a, b) {
            (Ok(session), Err(_)) | (Err(_), Ok(session)) => session,
            _ => panic!("Expected exactly one failure and one success"),
        };

        // The survivor must be pooled, not orphaned
        assert_eq!(pool.session_count().await, 1);
        let again = pool.acquire("s1", &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&survivor, &again));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_removes_only_stale_sessions() {
        let options = PoolOptions::default();
        let idle_timeout = options.idle_timeout;
        let f = fixture(options, Duration::ZERO);
        let cancel = CancellationToken::new();

        f.pool.acquire("s1", &cancel).await.unwrap();
        f.pool.acquire("s2", &cancel).await.unwrap();

        // s1 goes quiet; s2 sees activity 20 minutes in
        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        f.pool.touch("s2").await;
        tokio::time::advance(idle_timeout - Duration::from_secs(20 * 60)).await;

        f.pool.reap_idle(Instant::now()).await;

        assert_eq!(f.pool.session_count().await, 1);
        assert_eq!(f.disconnects.load(Ordering::SeqCst), 1);
        assert!(f.pool.sessions.lock().await.contains_key("s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_reaper_evicts_idle_session() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);
        f.pool.spawn_reaper();

        f.pool
            .acquire("s1", &CancellationToken::new())
            .await
            .unwrap();

        // Step through enough reaper ticks to pass the idle threshold
        for _ in 0..8 {
            tokio::time::advance(Duration::from_secs(5 * 60)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(f.pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);
        let cancel = CancellationToken::new();

        f.pool.acquire("s1", &cancel).await.unwrap();
        f.pool.acquire("s2", &cancel).await.unwrap();

        f.pool.shutdown().await;

        assert_eq!(f.pool.session_count().await, 0);
        assert_eq!(f.disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_register_server_enables_acquire() {
        let f = fixture(PoolOptions::default(), Duration::ZERO);

        assert!(!f.pool.is_configured("declared"));
        f.pool.register_server(
            "declared",
            McpServerConfig {
                url: Some("http://localhost:7000/mcp".to_string()),
                ..Default::default()
            },
        );
        assert!(f.pool.is_configured("declared"));

        let session = f
            .pool
            .acquire("declared", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.server(), "declared");
    }
}
