//! Tracked connections and the per-URL registry.
//!
//! A [`TrackedConnection`] is handed out synchronously, before the transport
//! is connected, like a socket in its connecting state. A background pump
//! task then owns the transport: inbound frames go through the
//! [`TradeBus`] and are re-published to whoever holds the connection,
//! outbound frames are written to the sink.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    bus::TradeBus,
    error::{StreamError, TransportError},
    transport::Connector,
    types::{ConnectionId, Frame},
};

/// Lifecycle state of a tracked connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle event observed by holders of a connection.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Message(Frame),
    /// Transport failure; always followed by [`ConnectionEvent::Closed`].
    Error(TransportError),
    Closed,
}

/// Point-in-time description of a connection, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub url: String,
    pub state: ConnectionState,
    pub opened_at: SystemTime,
    pub frames_received: u64,
}

/// Handle to an intercepted connection. Clones refer to the same connection.
#[derive(Clone, Debug)]
pub struct TrackedConnection {
    inner: Arc<Inner>,
}

#[derive(derive_more::Debug)]
struct Inner {
    id: ConnectionId,
    url: String,
    opened_at: SystemTime,
    frames_received: AtomicU64,
    closing: AtomicBool,
    #[debug(skip)]
    state: watch::Sender<ConnectionState>,
    #[debug(skip)]
    outbound: mpsc::UnboundedSender<Frame>,
    #[debug(skip)]
    close: Notify,
    #[debug(skip)]
    events: broadcast::Sender<ConnectionEvent>,
}

impl TrackedConnection {
    pub(crate) fn new(
        id: ConnectionId,
        url: &str,
        event_buffer: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let connection = Self {
            inner: Arc::new(Inner {
                id,
                url: url.to_string(),
                opened_at: SystemTime::now(),
                frames_received: AtomicU64::new(0),
                closing: AtomicBool::new(false),
                state: watch::Sender::new(ConnectionState::Connecting),
                outbound,
                close: Notify::new(),
                events,
            }),
        };
        (connection, outbound_rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// URL exactly as it was requested.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Whether a close was requested. No inbound frame is ingested after
    /// that, even if the transport had already buffered it.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.inner.id,
            url: self.inner.url.clone(),
            state: self.state(),
            opened_at: self.inner.opened_at,
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
        }
    }

    /// Subscribes to lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Queues `frame` for sending.
    ///
    /// Frames sent while still connecting are written once the transport is
    /// open.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), StreamError> {
        if !self.is_live() || self.is_closing() {
            return Err(StreamError::ConnectionClosed(self.inner.url.clone()));
        }
        self.inner
            .outbound
            .send(frame.into())
            .map_err(|_| StreamError::ConnectionClosed(self.inner.url.clone()))
    }

    /// Requests the connection to close. The state becomes
    /// [`ConnectionState::Closed`] once the transport is shut down.
    pub fn close(&self) {
        self.inner.closing.store(true, Ordering::Release);
        self.inner.close.notify_one();
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `self`, so the wait can only end by reaching
        // the closed state.
        _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        _ = self.inner.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }
}

/// Live connections keyed by the exact URL string they were opened with.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, TrackedConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live connection registered for `url`, or registers the one
    /// built by `create`.
    ///
    /// The extra value produced by `create` is handed back only when a new
    /// connection was registered.
    pub(crate) fn coalesce<R>(
        &self,
        url: &str,
        create: impl FnOnce() -> (TrackedConnection, R),
    ) -> (TrackedConnection, Option<R>) {
        match self.connections.entry(url.to_string()) {
            Entry::Occupied(entry) if entry.get().is_live() && !entry.get().is_closing() => {
                (entry.get().clone(), None)
            }
            Entry::Occupied(mut entry) => {
                let (connection, extra) = create();
                entry.insert(connection.clone());
                (connection, Some(extra))
            }
            Entry::Vacant(entry) => {
                let (connection, extra) = create();
                entry.insert(connection.clone());
                (connection, Some(extra))
            }
        }
    }

    /// Removes `connection` unless its URL was taken over by a newer one.
    pub fn remove(&self, connection: &TrackedConnection) -> bool {
        self.connections
            .remove_if(connection.url(), |_, current| current.id() == connection.id())
            .is_some()
    }

    pub fn get(&self, url: &str) -> Option<TrackedConnection> {
        self.connections.get(url).map(|entry| entry.value().clone())
    }

    /// Snapshot of registered connections, in no particular order.
    pub fn snapshot(&self) -> Vec<TrackedConnection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes and returns every registered connection.
    pub fn drain(&self) -> Vec<TrackedConnection> {
        let connections = self.snapshot();
        for connection in &connections {
            self.remove(connection);
        }
        connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Owns the transport of `connection` until it closes.
///
/// Transport failures end the connection but are not propagated: they are
/// logged and re-published as [`ConnectionEvent::Error`]. There is no
/// reconnect at this layer.
pub(crate) async fn pump(
    connection: TrackedConnection,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    connector: Arc<dyn Connector>,
    bus: Arc<TradeBus>,
    registry: Arc<ConnectionRegistry>,
) {
    let inner = &connection.inner;
    let (id, url) = (inner.id, inner.url.as_str());

    let connected = tokio::select! {
        biased;
        _ = inner.close.notified() => None,
        result = connector.connect(url) => Some(result),
    };

    match connected {
        None => debug!(id, url, "connection closed before open"),
        Some(Err(err)) => {
            warn!(id, url, %err, "failed to open connection");
            connection.emit(ConnectionEvent::Error(err));
        }
        Some(Ok((mut sink, mut stream))) => {
            connection.set_state(ConnectionState::Open);
            info!(id, url, "connection open");
            connection.emit(ConnectionEvent::Open);

            loop {
                tokio::select! {
                    biased;
                    _ = inner.close.notified() => {
                        if let Err(err) = sink.close().await {
                            debug!(id, url, %err, "error while closing transport");
                        }
                        break;
                    }
                    next = stream.next() => match next {
                        // Close requested after the frame was buffered.
                        Some(Ok(_)) if connection.is_closing() => continue,
                        Some(Ok(frame)) => {
                            inner.frames_received.fetch_add(1, Ordering::Relaxed);
                            let accepted = bus.ingest(&frame);
                            debug!(id, accepted, "frame ingested");
                            connection.emit(ConnectionEvent::Message(frame));
                        }
                        Some(Err(err)) => {
                            warn!(id, url, %err, "connection error");
                            connection.emit(ConnectionEvent::Error(err));
                            break;
                        }
                        None => {
                            debug!(id, url, "stream ended");
                            break;
                        }
                    },
                    Some(frame) = outbound.recv() => {
                        if let Err(err) = sink.send(frame).await {
                            warn!(id, url, %err, "failed to send frame");
                            connection.emit(ConnectionEvent::Error(err));
                            break;
                        }
                    }
                }
            }
        }
    }

    registry.remove(&connection);
    connection.set_state(ConnectionState::Closed);
    info!(id, url, "connection closed");
    connection.emit(ConnectionEvent::Closed);
}
