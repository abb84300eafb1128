//! The trade stream interceptor.
//!
//! One [`TradeStreamInterceptor`] is the choke point for realtime trade
//! traffic: connections are opened through it, every inbound frame is
//! normalized and deduplicated, and accepted trades are fanned out to
//! subscribers.
//!
//! Any number of independent interceptors can be created, which is what
//! tests do. Application code normally uses the process-wide one returned by
//! [`TradeStreamInterceptor::global`] through the crate-level functions.

use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    bus::{BusStats, TradeBus},
    config::InterceptorConfig,
    connection::{self, ConnectionRegistry, TrackedConnection},
    error::StreamError,
    listener::{Subscription, TradeReceiver},
    transport::Connector,
    types::{Frame, TradeMessage},
};

static GLOBAL: LazyLock<TradeStreamInterceptor> = LazyLock::new(|| {
    let config = InterceptorConfig::from_env().unwrap_or_else(|err| {
        warn!(%err, "invalid trade stream configuration, using defaults");
        InterceptorConfig::default()
    });
    TradeStreamInterceptor::new(config)
});

/// Connector together with the runtime pump tasks are spawned on.
#[derive(Clone)]
struct Installed {
    connector: Arc<dyn Connector>,
    runtime: Handle,
}

#[derive(derive_more::Debug)]
pub struct TradeStreamInterceptor {
    config: InterceptorConfig,
    bus: Arc<TradeBus>,
    registry: Arc<ConnectionRegistry>,
    #[debug(skip)]
    installed: RwLock<Option<Installed>>,
    next_connection_id: AtomicU64,
}

impl TradeStreamInterceptor {
    pub fn new(config: InterceptorConfig) -> Self {
        Self {
            bus: Arc::new(TradeBus::new(&config)),
            registry: Arc::new(ConnectionRegistry::new()),
            installed: RwLock::new(None),
            next_connection_id: AtomicU64::new(1),
            config,
        }
    }

    /// Process-wide interceptor, configured from `TRADE_STREAM_*` variables.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Installs `connector` as the way connections are opened.
    ///
    /// Idempotent: returns `true` only for the call that installed it. Must
    /// be called within a tokio runtime, which is captured to run connection
    /// tasks; outside of one nothing is installed.
    pub fn initialize(&self, connector: impl Connector) -> bool {
        self.initialize_with(Arc::new(connector))
    }

    pub fn initialize_with(&self, connector: Arc<dyn Connector>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            debug!("no tokio runtime, trade stream interception not installed");
            return false;
        };
        let mut installed = self.installed.write();
        if installed.is_some() {
            return false;
        }
        *installed = Some(Installed { connector, runtime });
        info!("trade stream interception installed");
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.installed.read().is_some()
    }

    /// Opens a connection to `url`, or returns the live one already open for
    /// the exact same URL string.
    ///
    /// Returns immediately; the connection starts in the connecting state.
    pub fn open_tracked_connection(&self, url: &str) -> Result<TrackedConnection, StreamError> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(StreamError::UnsupportedScheme(parsed.scheme().to_string()));
        }
        let installed = self
            .installed
            .read()
            .clone()
            .ok_or(StreamError::NotInitialized)?;

        let (connection, outbound) = self.registry.coalesce(url, || {
            let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            TrackedConnection::new(id, url, self.config.event_buffer)
        });

        match outbound {
            Some(outbound) => {
                debug!(id = connection.id(), url, "opening tracked connection");
                installed.runtime.spawn(connection::pump(
                    connection.clone(),
                    outbound,
                    installed.connector,
                    self.bus.clone(),
                    self.registry.clone(),
                ));
            }
            None => debug!(id = connection.id(), url, "reusing live connection"),
        }
        Ok(connection)
    }

    /// Registers `listener` for every accepted trade. Works whether or not
    /// the interceptor is initialized.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TradeMessage) + Send + Sync + 'static,
    {
        self.bus.listeners().register(listener)
    }

    /// Channel-based subscription with the configured capacity.
    pub fn subscribe_channel(&self) -> TradeReceiver {
        self.subscribe_channel_with_capacity(self.config.channel_size)
    }

    pub fn subscribe_channel_with_capacity(&self, capacity: usize) -> TradeReceiver {
        self.bus.listeners().register_channel(capacity)
    }

    /// Snapshot of currently open (or opening) connections.
    pub fn list_active_connections(&self) -> Vec<TrackedConnection> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|connection| connection.is_live() && !connection.is_closing())
            .collect()
    }

    /// Feeds a frame through the same path inbound connection traffic takes.
    pub fn ingest(&self, frame: &Frame) -> usize {
        self.bus.ingest(frame)
    }

    pub fn stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Returns the interceptor to its freshly created state: closes tracked
    /// connections, forgets seen keys and listeners, uninstalls the
    /// connector.
    pub fn reset(&self) {
        for connection in self.registry.drain() {
            connection.close();
        }
        self.bus.reset();
        *self.installed.write() = None;
        debug!("trade stream interceptor reset");
    }
}

impl Default for TradeStreamInterceptor {
    fn default() -> Self {
        Self::new(InterceptorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    #[test]
    fn test_initialize_outside_runtime_is_noop() {
        let interceptor = TradeStreamInterceptor::default();
        assert!(!interceptor.initialize(MockConnector::new()));
        assert!(!interceptor.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let interceptor = TradeStreamInterceptor::default();
        assert!(interceptor.initialize(MockConnector::new()));
        assert!(!interceptor.initialize(MockConnector::new()));
        assert!(interceptor.is_initialized());
    }

    #[tokio::test]
    async fn test_open_requires_initialize() {
        let interceptor = TradeStreamInterceptor::default();
        assert!(matches!(
            interceptor.open_tracked_connection("wss://feed.test/trades"),
            Err(StreamError::NotInitialized)
        ));
        assert!(interceptor.list_active_connections().is_empty());
    }

    #[tokio::test]
    async fn test_open_validates_url() {
        let interceptor = TradeStreamInterceptor::default();
        interceptor.initialize(MockConnector::new());
        assert!(matches!(
            interceptor.open_tracked_connection("not a url"),
            Err(StreamError::InvalidUrl(_))
        ));
        assert!(matches!(
            interceptor.open_tracked_connection("https://feed.test/trades"),
            Err(StreamError::UnsupportedScheme(scheme)) if scheme == "https"
        ));
    }

    #[test]
    fn test_ingest_without_connections() {
        let interceptor = TradeStreamInterceptor::default();
        let mut trades = interceptor.subscribe_channel_with_capacity(1);
        let frame = Frame::from(r#"[{"id": "a"}, {"id": "b"}]"#);

        assert_eq!(interceptor.ingest(&frame), 2);
        assert_eq!(trades.try_recv().and_then(|t| t.id().map(str::to_string)), Some("a".into()));
        // Capacity 1: the second trade was dropped for this receiver.
        assert!(trades.try_recv().is_none());
        assert_eq!(interceptor.stats().accepted, 2);
    }

    #[tokio::test]
    async fn test_reset_uninstalls() {
        let interceptor = TradeStreamInterceptor::default();
        interceptor.initialize(MockConnector::new());
        let _sub = interceptor.subscribe(|_| {});
        interceptor.reset();
        assert!(!interceptor.is_initialized());
        assert!(interceptor.bus.listeners().is_empty());
        assert!(interceptor.initialize(MockConnector::new()));
    }
}
