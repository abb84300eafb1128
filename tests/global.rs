//! Crate-level functions share the process-wide interceptor, so everything
//! touching it lives in this one test binary and one test.

use std::time::Duration;

use dex_trade_stream::{
    self as trade_stream, StreamError,
    testing::{MockConnector, TradeBuilder},
};

const FEED: &str = "wss://global.test/trades";

#[tokio::test]
async fn test_global_interceptor_lifecycle() {
    assert!(matches!(
        trade_stream::open_tracked_connection(FEED),
        Err(StreamError::NotInitialized)
    ));

    let connector = MockConnector::new();
    assert!(trade_stream::initialize_with(connector.clone()));
    // Already installed: the WebSocket connector is not swapped in.
    trade_stream::initialize();

    let mut trades = trade_stream::subscribe_channel();
    let connection = trade_stream::open_tracked_connection(FEED).unwrap();
    assert_eq!(trade_stream::list_active_connections().len(), 1);

    let feed = connector.wait_for_feed(FEED, 1).await;
    feed.push_json(TradeBuilder::with_id("g-1").symbol("BTC").trade_envelope());

    let trade = tokio::time::timeout(Duration::from_secs(2), trades.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade.id(), Some("g-1"));
    assert_eq!(trade.token_symbol(), Some("BTC"));

    trade_stream::reset();
    connection.closed().await;
    assert!(trade_stream::list_active_connections().is_empty());
    assert!(trades.recv().await.is_none());
}
