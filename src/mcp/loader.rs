//! Per-request dynamic tool discovery.
//!
//! [`DynamicToolLoader::load`] opens one MCP session, lists the server's
//! actions within a bounded wait and wraps each as a [`Tool`]. Every failure
//! (unset endpoint, connect error, listing error, timeout, empty listing)
//! degrades to an empty tool set. A successful load hands back the open
//! [`ToolSession`]; the caller owns it and must close it once the tools are
//! no longer needed. Closing waits at most [`CLOSE_GRACE`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::error::BotError;
use crate::status::StatusSink;
use crate::tools::tool::Tool;

use super::bridge::{MCPClientOps, MCPSession};
use super::client::MCPClient;

/// Longest wait for a session to shut down before it is dropped.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens MCP sessions.
#[async_trait]
pub trait MCPConnector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn MCPClientOps>, BotError>;
}

/// Connector using the streamable-HTTP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl MCPConnector for HttpConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn MCPClientOps>, BotError> {
        Ok(Box::new(MCPClient::connect(endpoint).await?))
    }
}

/// Open session backing a set of discovered tools.
pub struct ToolSession {
    session: Arc<MCPSession>,
}

impl ToolSession {
    /// Close the session. Errors and a hung shutdown are logged and swallowed.
    pub async fn close(self) {
        match timeout(CLOSE_GRACE, self.session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to close tool session"),
            Err(_) => warn!(
                grace_ms = CLOSE_GRACE.as_millis() as u64,
                "tool session did not close in time; dropping it"
            ),
        }
    }
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSession").finish_non_exhaustive()
    }
}

/// Result of one discovery attempt.
#[derive(Default)]
pub struct LoadedTools {
    pub tools: Vec<Arc<dyn Tool>>,
    pub session: Option<ToolSession>,
}

impl LoadedTools {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Close the session, if any.
    pub async fn close(self) {
        if let Some(session) = self.session {
            session.close().await;
        }
    }
}

/// Discovers tools from a configured MCP endpoint.
#[derive(Clone)]
pub struct DynamicToolLoader {
    endpoint: Option<Url>,
    timeout: Duration,
    connector: Arc<dyn MCPConnector>,
}

impl DynamicToolLoader {
    pub fn new(endpoint: Option<Url>, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            connector: Arc::new(HttpConnector),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(config.mcp_url.clone(), config.discovery_timeout)
    }

    /// Replace the session connector.
    pub fn with_connector(mut self, connector: Arc<dyn MCPConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Discover tools. Never fails; see the module docs.
    ///
    /// Discovery gives up at the configured timeout or at `request_deadline`,
    /// whichever comes first.
    pub async fn load(
        &self,
        status: &StatusSink,
        request_deadline: Option<Instant>,
    ) -> LoadedTools {
        let Some(endpoint) = self.endpoint.as_ref() else {
            debug!("tool server URL not set; dynamic tools disabled");
            return LoadedTools::empty();
        };

        let own_deadline = Instant::now() + self.timeout;
        let deadline = request_deadline.map_or(own_deadline, |d| d.min(own_deadline));
        let budget_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        status.emit("Connecting to tool server...");

        let client = match timeout_at(deadline, self.connector.connect(endpoint)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                warn!(error = %e, "tool server connection failed");
                status.emit(format!("Error fetching tools: {e}"));
                return LoadedTools::empty();
            }
            Err(_) => {
                warn!(budget_ms, "tool server connection timed out");
                status.emit("Error fetching tools: timed out");
                return LoadedTools::empty();
            }
        };

        let shared = Arc::new(MCPSession::new(client));
        let session = ToolSession {
            session: shared.clone(),
        };

        status.emit("Fetching tools...");
        let listed = match timeout_at(deadline, shared.discover()).await {
            Ok(Ok(listed)) => listed,
            Ok(Err(e)) => {
                warn!(error = %e, "tool listing failed");
                status.emit(format!("Error fetching tools: {e}"));
                session.close().await;
                return LoadedTools::empty();
            }
            Err(_) => {
                warn!(budget_ms, "tool listing timed out");
                status.emit("Error fetching tools: timed out");
                session.close().await;
                return LoadedTools::empty();
            }
        };

        if listed.is_empty() {
            status.emit("No tools found...");
            session.close().await;
            return LoadedTools::empty();
        }

        let tools: Vec<Arc<dyn Tool>> = listed
            .into_iter()
            .map(|tool| Arc::new(tool) as Arc<dyn Tool>)
            .collect();
        info!(count = tools.len(), "discovered tools");

        LoadedTools {
            tools,
            session: Some(session),
        }
    }
}

impl std::fmt::Debug for DynamicToolLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicToolLoader")
            .field("enabled", &self.is_enabled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::MCPToolCallResult;
    use crate::mcp::schema::MCPToolSchema;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Listing {
        Tools,
        Empty,
        Fails,
        Hangs,
    }

    #[derive(Default)]
    struct Counters {
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    struct FakeSession {
        listing: Listing,
        hang_on_close: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl MCPClientOps for FakeSession {
        async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>, BotError> {
            match self.listing {
                Listing::Tools => Ok(vec![MCPToolSchema {
                    name: "gmail_send_email".into(),
                    description: Some("Send an email".into()),
                    input_schema: json!({"properties": {"instructions": {}}}),
                }]),
                Listing::Empty => Ok(Vec::new()),
                Listing::Fails => Err(BotError::Stream("listing exploded".into())),
                Listing::Hangs => std::future::pending().await,
            }
        }

        async fn call_tool(
            &mut self,
            name: &str,
            _arguments: serde_json::Value,
        ) -> Result<MCPToolCallResult, BotError> {
            Ok(MCPToolCallResult {
                structured_content: None,
                text_content: Some(format!("ran {name}")),
                content: Vec::new(),
            })
        }

        async fn close(&mut self) -> Result<(), BotError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_close {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    struct FakeConnector {
        listing: Listing,
        refuse: bool,
        hang_on_close: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl MCPConnector for FakeConnector {
        async fn connect(&self, _endpoint: &Url) -> Result<Box<dyn MCPClientOps>, BotError> {
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(BotError::Stream("connection refused".into()));
            }
            Ok(Box::new(FakeSession {
                listing: self.listing,
                hang_on_close: self.hang_on_close,
                counters: self.counters.clone(),
            }))
        }
    }

    fn loader(endpoint: Option<&str>, listing: Listing, refuse: bool) -> (DynamicToolLoader, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let loader = DynamicToolLoader::new(
            endpoint.map(|u| Url::parse(u).unwrap()),
            Duration::from_secs(10),
        )
        .with_connector(Arc::new(FakeConnector {
            listing,
            refuse,
            hang_on_close: false,
            counters: counters.clone(),
        }));
        (loader, counters)
    }

    fn recording_sink() -> (StatusSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        (
            StatusSink::new(move |s| captured.lock().unwrap().push(s.to_string())),
            seen,
        )
    }

    #[tokio::test]
    async fn unset_endpoint_makes_no_connection() {
        let (loader, counters) = loader(None, Listing::Tools, false);
        let loaded = loader.load(&StatusSink::none(), None).await;

        assert!(loaded.tools.is_empty());
        assert!(loaded.session.is_none());
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_discovery_keeps_session_open_until_closed() {
        let (loader, counters) = loader(Some("https://mcp.example.com/s/abc"), Listing::Tools, false);
        let (status, seen) = recording_sink();

        let loaded = loader.load(&status, None).await;
        assert_eq!(loaded.tools.len(), 1);
        assert_eq!(loaded.tools[0].name(), "gmail_send_email");
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Connecting to tool server...", "Fetching tools..."]
        );

        loaded.close().await;
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_failure_degrades_to_empty_set() {
        let (loader, _) = loader(Some("https://mcp.example.com"), Listing::Tools, true);
        let (status, seen) = recording_sink();

        let loaded = loader.load(&status, None).await;
        assert!(loaded.tools.is_empty());
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.starts_with("Error fetching tools:") && s.contains("connection refused")));
    }

    #[tokio::test]
    async fn listing_failure_closes_the_session() {
        let (loader, counters) = loader(Some("https://mcp.example.com"), Listing::Fails, false);
        let loaded = loader.load(&StatusSink::none(), None).await;

        assert!(loaded.tools.is_empty());
        assert!(loaded.session.is_none());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_listing_reports_no_tools() {
        let (loader, counters) = loader(Some("https://mcp.example.com"), Listing::Empty, false);
        let (status, seen) = recording_sink();

        let loaded = loader.load(&status, None).await;
        assert!(loaded.tools.is_empty());
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("No tools found..."));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_listing_times_out_and_closes() {
        let (loader, counters) = loader(Some("https://mcp.example.com"), Listing::Hangs, false);
        let started = Instant::now();

        let loaded = loader.load(&StatusSink::none(), None).await;
        assert!(loaded.tools.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_deadline_caps_discovery() {
        let (loader, counters) = loader(Some("https://mcp.example.com"), Listing::Hangs, false);
        let started = Instant::now();

        let loaded = loader
            .load(&StatusSink::none(), Some(started + Duration::from_secs(2)))
            .await;
        assert!(loaded.tools.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_close_is_abandoned_after_grace() {
        let counters = Arc::new(Counters::default());
        let loader = DynamicToolLoader::new(
            Some(Url::parse("https://mcp.example.com").unwrap()),
            Duration::from_secs(10),
        )
        .with_connector(Arc::new(FakeConnector {
            listing: Listing::Tools,
            refuse: false,
            hang_on_close: true,
            counters: counters.clone(),
        }));

        let loaded = loader.load(&StatusSink::none(), None).await;
        assert_eq!(loaded.tools.len(), 1);

        let started = Instant::now();
        loaded.close().await;
        let waited = started.elapsed();
        assert!(waited >= CLOSE_GRACE && waited < CLOSE_GRACE + Duration::from_secs(1));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }
}
