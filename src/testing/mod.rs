//! In-memory transport and test utilities.
//!
//! [`MockConnector`] stands in for a WebSocket server: every connect attempt
//! is recorded and produces a [`MockFeed`], through which a test pushes
//! inbound frames, fails or ends the stream, and inspects what the client
//! sent.
//!
//! [`TradeBuilder`] assembles trade payloads in the shapes realtime feeds
//! publish them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::{FutureExt, StreamExt, future::BoxFuture, sink, stream};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use crate::{
    error::TransportError,
    transport::{Connector, FrameSink, FrameStream},
    types::Frame,
};

const POLL_INTERVAL_MS: u64 = 5;
const WAIT_TIMEOUT_MS: u64 = 2000;

type Inbound = mpsc::UnboundedSender<Result<Frame, TransportError>>;

#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    attempts: DashMap<String, usize>,
    total_attempts: AtomicUsize,
    feeds: DashMap<String, Vec<MockFeed>>,
    refusals: DashMap<String, TransportError>,
}

/// Server side of one mock connection.
#[derive(Clone, Debug)]
pub struct MockFeed {
    url: String,
    inbound: Arc<Mutex<Option<Inbound>>>,
    sent: Arc<Mutex<Vec<Frame>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next connect attempt to `url` fail with `err`.
    pub fn refuse_next(&self, url: &str, err: TransportError) {
        self.state.refusals.insert(url.to_string(), err);
    }

    /// Number of connect attempts made to `url`.
    pub fn attempts(&self, url: &str) -> usize {
        self.state.attempts.get(url).map(|n| *n).unwrap_or_default()
    }

    pub fn total_attempts(&self) -> usize {
        self.state.total_attempts.load(Ordering::SeqCst)
    }

    /// Feeds of all successful connects to `url`, oldest first.
    pub fn feeds(&self, url: &str) -> Vec<MockFeed> {
        self.state
            .feeds
            .get(url)
            .map(|feeds| feeds.clone())
            .unwrap_or_default()
    }

    /// Waits until `count` connections to `url` were established and returns
    /// the latest one.
    ///
    /// Connects happen on a background task, so tests wait for them here.
    ///
    /// # Panics
    ///
    /// When the connections do not show up within two seconds.
    pub async fn wait_for_feed(&self, url: &str, count: usize) -> MockFeed {
        wait_until(|| self.feeds(url).len() >= count).await;
        self.feeds(url)
            .into_iter()
            .nth(count - 1)
            .expect("feed is established")
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        url: &str,
    ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        let state = self.state.clone();
        let url = url.to_string();
        async move {
            *state.attempts.entry(url.clone()).or_default() += 1;
            state.total_attempts.fetch_add(1, Ordering::SeqCst);
            if let Some((_, err)) = state.refusals.remove(&url) {
                return Err(err);
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let feed = MockFeed {
                url: url.clone(),
                inbound: Arc::new(Mutex::new(Some(tx))),
                sent: Arc::default(),
            };

            let sent = feed.sent.clone();
            let sink: FrameSink = Box::pin(sink::unfold(sent, |sent, frame: Frame| async move {
                sent.lock().push(frame);
                Ok::<_, TransportError>(sent)
            }));
            let stream: FrameStream = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed();

            state.feeds.entry(url).or_default().push(feed);
            Ok((sink, stream))
        }
        .boxed()
    }
}

impl MockFeed {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Delivers `frame` to the client. Returns `false` if the feed has ended.
    pub fn push(&self, frame: impl Into<Frame>) -> bool {
        self.inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame.into())).is_ok())
    }

    pub fn push_json(&self, value: Value) -> bool {
        self.push(Frame::Text(value.to_string()))
    }

    /// Fails the stream with `err`, which closes the connection.
    pub fn fail(&self, err: TransportError) -> bool {
        self.inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Err(err)).is_ok())
    }

    /// Ends the stream as if the server went away.
    pub fn end(&self) {
        self.inbound.lock().take();
    }

    /// Whether the client side has released the connection.
    pub fn is_released(&self) -> bool {
        self.inbound.lock().as_ref().is_none_or(|tx| tx.is_closed())
    }

    /// Frames written by the client so far.
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Waits until the client has written at least `count` frames.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Frame> {
        wait_until(|| self.sent.lock().len() >= count).await;
        self.sent()
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// When the condition does not hold within two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waiting = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    };
    tokio::time::timeout(Duration::from_millis(WAIT_TIMEOUT_MS), waiting)
        .await
        .expect("condition holds in time");
}

/// Builder of trade payloads.
#[derive(Clone, Debug, Default)]
pub struct TradeBuilder {
    fields: Map<String, Value>,
}

impl TradeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: &str) -> Self {
        Self::new().field("id", id)
    }

    /// Trade identified by its on-chain log position only.
    pub fn on_chain(block_number: u64, log_index: u64, address: &str) -> Self {
        Self::new()
            .field("blockNumber", block_number)
            .field("logIndex", log_index)
            .field("address", address)
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn account(self, account: &str) -> Self {
        self.field("account", account)
    }

    pub fn buy(self, is_buy: bool) -> Self {
        self.field("isBuy", is_buy)
    }

    pub fn amounts(self, amount_in: &str, amount_out: &str) -> Self {
        self.field("amountIn", amount_in).field("amountOut", amount_out)
    }

    pub fn symbol(self, symbol: &str) -> Self {
        self.field("tokenSymbol", symbol)
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }

    /// `{"type": "trade", "data": ...}` envelope.
    pub fn trade_envelope(self) -> Value {
        json!({"type": "trade", "data": self.build()})
    }

    /// `{"event": "trade", "payload": ...}` envelope.
    pub fn event_envelope(self) -> Value {
        json!({"event": "trade", "payload": self.build()})
    }
}

/// `{"records": [...]}` batch of `trades`.
pub fn records(trades: impl IntoIterator<Item = TradeBuilder>) -> Value {
    json!({"records": trades.into_iter().map(TradeBuilder::build).collect::<Vec<_>>()})
}
