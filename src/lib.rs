//! Realtime DEX trade stream.
//!
//! # Overview
//!
//! Single point of interception for realtime trade traffic. Connections to
//! trade feeds are opened through the interceptor, which parses every inbound
//! frame (whatever the producer's envelope), deduplicates trade events that
//! arrive through several feeds and fans them out to subscribers as
//! normalized [`types::TradeMessage`]s.
//!
//! Call [`initialize`] once from within a tokio runtime, then
//! [`open_tracked_connection`] for every feed and [`subscribe`] (or
//! [`subscribe_channel`]) to receive trades. The free functions operate on
//! the process-wide [`TradeStreamInterceptor::global`]; independent
//! interceptors can be created with [`TradeStreamInterceptor::new`].
//!
//! See `./tests` for examples.
//!
//! # Limitations/follow-ups
//!
//! * No reconnects: a failed or closed connection stays closed until it is
//!   opened again.
//!
//! * Duplicates are only detected within the seen-key retention window
//!   (60 seconds by default).
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory [`transport::Connector`] and
//! trade payload builders.

pub mod bus;
pub mod config;
pub mod connection;
pub mod dedup;
pub mod error;
pub mod frame;
pub mod interceptor;
pub mod listener;
pub mod testing;
pub mod transport;
pub mod types;

pub use config::InterceptorConfig;
pub use connection::{ConnectionEvent, ConnectionState, TrackedConnection};
pub use error::{StreamError, TransportError};
pub use interceptor::TradeStreamInterceptor;
pub use listener::{Subscription, TradeReceiver};
pub use types::{Frame, TradeMessage};

/// Installs WebSocket interception on the global interceptor.
///
/// Idempotent, and a no-op when called outside of a tokio runtime.
pub fn initialize() {
    TradeStreamInterceptor::global().initialize(transport::WsConnector);
}

/// Installs `connector` on the global interceptor; see [`initialize`].
pub fn initialize_with(connector: impl transport::Connector) -> bool {
    TradeStreamInterceptor::global().initialize(connector)
}

/// Registers `listener` with the global interceptor.
pub fn subscribe<F>(listener: F) -> Subscription
where
    F: Fn(&TradeMessage) + Send + Sync + 'static,
{
    TradeStreamInterceptor::global().subscribe(listener)
}

/// Channel subscription with the global interceptor.
pub fn subscribe_channel() -> TradeReceiver {
    TradeStreamInterceptor::global().subscribe_channel()
}

/// Live connections of the global interceptor.
pub fn list_active_connections() -> Vec<TrackedConnection> {
    TradeStreamInterceptor::global().list_active_connections()
}

/// Opens (or reuses) a connection through the global interceptor.
pub fn open_tracked_connection(url: &str) -> Result<TrackedConnection, StreamError> {
    TradeStreamInterceptor::global().open_tracked_connection(url)
}

/// Resets the global interceptor to its initial state.
pub fn reset() {
    TradeStreamInterceptor::global().reset();
}
