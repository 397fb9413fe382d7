//! Integration tests for the streaming client over the in-process transport.
//!
//! A `MemoryListener` plays the server: each `connect` shows up as a
//! `MemoryPeer` that scripts inbound frames and records what the client wrote.
//!
//! Run with:
//! ```bash
//! cargo test --test stream_client
//! ```

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::time::timeout;
use tokio_test::{assert_pending, task};

use stockpulse_live::board::PriceBoard;
use stockpulse_live::error::StreamError;
use stockpulse_live::ws::transport::memory::{self, MemoryConnector, MemoryListener, MemoryPeer};
use stockpulse_live::ws::transport::{ConnectFuture, Connector, Frame, Transport};
use stockpulse_live::ws::{
    ConnectionState, InboundMessage, MessageStream, PriceStreamClient, ReadyState, Request,
    StreamConfig,
};

const URL: &str = "memory://live-prices";
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn memory_client() -> (PriceStreamClient, MemoryListener) {
    init_tracing();
    let (connector, listener) = memory::channel();
    (PriceStreamClient::with_connector(StreamConfig::default(), connector), listener)
}

/// Connect and wait until the client reports `Connected`.
async fn connected(client: &PriceStreamClient, listener: &mut MemoryListener) -> MemoryPeer {
    client.connect(URL);
    let peer = timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for connection")
        .expect("listener closed");
    wait_for_state(client, ConnectionState::Connected).await;
    peer
}

async fn wait_for_state(client: &PriceStreamClient, wanted: ConnectionState) {
    let mut states = client.connection_states();
    timeout(TEST_TIMEOUT, async {
        while let Some(state) = states.next().await {
            if state == wanted {
                return;
            }
        }
        panic!("state stream ended before {wanted}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted}"));
}

async fn next_item(messages: &mut MessageStream) -> Option<Result<InboundMessage, StreamError>> {
    timeout(TEST_TIMEOUT, messages.next())
        .await
        .expect("timed out waiting for message")
}

async fn next_message(messages: &mut MessageStream) -> InboundMessage {
    next_item(messages)
        .await
        .expect("message stream ended")
        .expect("unexpected stream error")
}

fn price_update(symbol: &str, price: f64) -> serde_json::Value {
    json!({"type": "price_update", "data": {"symbol": symbol, "price": price}})
}

// ─── Delivery ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn price_update_reaches_every_consumer_exactly_once() {
    let (client, mut listener) = memory_client();
    let mut first = client.messages();
    let mut second = client.messages();
    let peer = connected(&client, &mut listener).await;

    peer.send_json(&price_update("NVDA", 123.45));
    peer.send_json(&json!({"type": "info", "message": "marker"}));

    for messages in [&mut first, &mut second] {
        let tick = next_message(messages).await;
        let tick = tick.price_tick().expect("price update");
        assert_eq!(tick.symbol, "NVDA");
        assert_eq!(tick.price, 123.45);

        // The next item is the marker, not a duplicate.
        assert_eq!(next_message(messages).await.kind(), "info");
    }
}

#[tokio::test]
async fn late_consumer_sees_only_later_messages() {
    let (client, mut listener) = memory_client();
    let mut early = client.messages();
    let peer = connected(&client, &mut listener).await;

    peer.send_json(&price_update("MSFT", 410.0));
    next_message(&mut early).await;

    let mut late = client.messages();
    peer.send_json(&price_update("AAPL", 190.0));
    let msg = next_message(&mut late).await;
    assert_eq!(msg.price_tick().unwrap().symbol, "AAPL");
}

#[tokio::test]
async fn message_order_is_preserved() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    for price in [1.0, 2.0, 3.0, 4.0] {
        peer.send_json(&price_update("AMZN", price));
    }
    for price in [1.0, 2.0, 3.0, 4.0] {
        assert_eq!(next_message(&mut messages).await.price_tick().unwrap().price, price);
    }
}

#[tokio::test]
async fn invalid_json_is_dropped_and_unknown_types_delivered() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    peer.send_text("definitely not json");
    peer.send_json(&json!({"type": "alert_triggered", "symbol": "META"}));

    match next_message(&mut messages).await {
        InboundMessage::Unknown(raw) => assert_eq!(raw["type"], "alert_triggered"),
        other => panic!("expected Unknown, got {other:?}"),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn application_error_keeps_connection_open() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    peer.send_json(&json!({"type": "error", "message": "No valid symbols provided"}));
    assert_eq!(next_message(&mut messages).await.kind(), "error");
    assert!(client.is_connected());
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn slow_consumer_still_receives_every_update() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    for price in 1..=2000 {
        peer.send_json(&price_update("NVDA", f64::from(price)));
    }
    peer.send_json(&json!({"type": "info", "message": "marker"}));
    // Let the connection task publish everything before reading starts.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let mut prices = Vec::new();
    loop {
        let message = next_message(&mut messages).await;
        match message.price_tick() {
            Some(tick) => prices.push(tick.price),
            None => {
                assert_eq!(message.kind(), "info");
                break;
            }
        }
    }
    let expected: Vec<f64> = (1..=2000).map(f64::from).collect();
    assert_eq!(prices, expected);
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_while_open_closes_prior_connection_first() {
    let (client, mut listener) = memory_client();
    let mut old_peer = connected(&client, &mut listener).await;
    let mut states = client.connection_states();
    assert_eq!(states.next().await, Some(ConnectionState::Connected));

    client.connect("memory://live-prices-2");
    assert_eq!(client.connection_state(), ConnectionState::Connecting);
    assert!(!client.is_connected());
    assert_eq!(states.next().await, Some(ConnectionState::Connecting));

    match timeout(TEST_TIMEOUT, old_peer.recv()).await.unwrap() {
        Some(Frame::Close(Some(reason))) => assert_eq!(reason.code, 1000),
        other => panic!("expected close frame on the old connection, got {other:?}"),
    }

    let new_peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    assert_eq!(new_peer.url(), "memory://live-prices-2");
    assert_eq!(
        timeout(TEST_TIMEOUT, states.next()).await.unwrap(),
        Some(ConnectionState::Connected)
    );

    // The replaced connection can no longer reach consumers.
    let mut messages = client.messages();
    old_peer.send_json(&price_update("NVDA", 1.0));
    new_peer.send_json(&price_update("NVDA", 2.0));
    assert_eq!(next_message(&mut messages).await.price_tick().unwrap().price, 2.0);
}

#[tokio::test]
async fn is_connected_tracks_the_handle() {
    let (client, mut listener) = memory_client();
    assert!(!client.is_connected());
    assert_eq!(client.ready_state(), ReadyState::Closed);

    let _peer = connected(&client, &mut listener).await;
    assert!(client.is_connected());

    client.disconnect();
    assert!(!client.is_connected());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (client, mut listener) = memory_client();
    client.disconnect();

    let mut peer = connected(&client, &mut listener).await;
    client.disconnect();
    client.disconnect();

    assert!(matches!(peer.recv().await, Some(Frame::Close(_))));
    assert!(peer.recv().await.is_none());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn requests_while_disconnected_are_never_written() {
    let (client, mut listener) = memory_client();

    // Never connected: no panic, nothing to write to.
    client.subscribe_to_symbols(["NVDA", "MSFT"]);
    client.subscribe_to_symbol("AAPL");
    client.send_ping();

    let mut peer = connected(&client, &mut listener).await;
    client.disconnect();

    client.subscribe_to_symbols(["NVDA", "MSFT"]);
    client.subscribe_to_symbol("AAPL");
    client.unsubscribe_from_symbol("AAPL");
    client.send_ping();

    while let Some(frame) = timeout(TEST_TIMEOUT, peer.recv()).await.unwrap() {
        assert!(matches!(frame, Frame::Close(_)), "unexpected write: {frame:?}");
    }
}

#[tokio::test]
async fn subscribe_requests_are_written_in_call_order() {
    let (client, mut listener) = memory_client();
    let mut peer = connected(&client, &mut listener).await;

    client.subscribe_to_symbols(["NVDA", "MSFT"]);
    client.subscribe_to_symbol("GOOGL");
    client.unsubscribe_from_symbols(["MSFT"]);
    client.send_ping();

    assert_eq!(peer.recv_request().await, Some(Request::subscribe_symbols(["NVDA", "MSFT"])));
    assert_eq!(peer.recv_request().await, Some(Request::subscribe_symbol("GOOGL")));
    assert_eq!(peer.recv_request().await, Some(Request::unsubscribe_symbols(["MSFT"])));
    assert_eq!(peer.recv_request().await, Some(Request::Ping));
}

#[tokio::test]
async fn clean_server_close_is_not_an_error() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    peer.close(1000, "server shutting down");
    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert!(!client.is_connected());

    // The same stream keeps working for the next connection.
    let peer = connected(&client, &mut listener).await;
    peer.send_json(&price_update("META", 500.0));
    assert_eq!(next_message(&mut messages).await.price_tick().unwrap().symbol, "META");
}

// ─── Faults ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transport_error_ends_streams_then_disconnects() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;
    let mut states = client.connection_states();
    assert_eq!(states.next().await, Some(ConnectionState::Connected));

    peer.fail(StreamError::Io("connection reset by peer".into()));
    peer.send_json(&price_update("NVDA", 1.0));

    match next_item(&mut messages).await {
        Some(Err(StreamError::Io(reason))) => assert!(reason.contains("reset")),
        other => panic!("expected Io error, got {other:?}"),
    }
    assert!(next_item(&mut messages).await.is_none());

    assert_eq!(
        timeout(TEST_TIMEOUT, states.next()).await.unwrap(),
        Some(ConnectionState::Disconnected)
    );
    assert!(!client.is_connected());
}

#[tokio::test]
async fn peer_vanishing_is_an_abnormal_closure() {
    let (client, mut listener) = memory_client();
    let mut messages = client.messages();
    let peer = connected(&client, &mut listener).await;

    drop(peer);
    match next_item(&mut messages).await {
        Some(Err(StreamError::Closed { code, .. })) => assert_eq!(code, 1006),
        other => panic!("expected abnormal closure, got {other:?}"),
    }
    wait_for_state(&client, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn fresh_connect_clears_the_fault() {
    let (client, mut listener) = memory_client();
    let peer = connected(&client, &mut listener).await;
    drop(peer);
    wait_for_state(&client, ConnectionState::Disconnected).await;

    // Faulted: new streams end immediately with the remembered error.
    let mut stale = client.messages();
    assert!(matches!(next_item(&mut stale).await, Some(Err(StreamError::Closed { .. }))));
    assert!(next_item(&mut stale).await.is_none());

    let peer = connected(&client, &mut listener).await;
    let mut fresh = client.messages();
    let mut pending = task::spawn(fresh.next());
    assert_pending!(pending.poll());
    drop(pending);

    peer.send_json(&price_update("GOOGL", 170.25));
    assert_eq!(next_message(&mut fresh).await.price_tick().unwrap().price, 170.25);
}

struct HangingConnector;

impl Connector for HangingConnector {
    fn connect(&self, _url: &str) -> ConnectFuture {
        Box::pin(std::future::pending::<Result<Transport, StreamError>>())
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_faults() {
    init_tracing();
    let config = StreamConfig {
        connect_timeout_ms: 1_000,
        ..Default::default()
    };
    let client = PriceStreamClient::with_connector(config, HangingConnector);
    let mut messages = client.messages();
    client.connect(URL);

    assert_eq!(messages.next().await, Some(Err(StreamError::Timeout)));
    wait_for_state(&client, ConnectionState::Disconnected).await;
}

/// Reads the client's ready state from inside `connect`.
#[derive(Clone)]
struct StateReadingConnector {
    client: Arc<OnceLock<PriceStreamClient>>,
    seen: Arc<Mutex<Vec<ReadyState>>>,
    inner: MemoryConnector,
}

impl Connector for StateReadingConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        if let Some(client) = self.client.get() {
            self.seen.lock().unwrap().push(client.ready_state());
        }
        self.inner.connect(url)
    }
}

#[tokio::test]
async fn connector_may_call_back_into_the_client() {
    init_tracing();
    let (inner, mut listener) = memory::channel();
    let connector = StateReadingConnector {
        client: Arc::new(OnceLock::new()),
        seen: Arc::new(Mutex::new(Vec::new())),
        inner,
    };
    let client = PriceStreamClient::with_connector(StreamConfig::default(), connector.clone());
    let _ = connector.client.set(client.clone());

    let _peer = connected(&client, &mut listener).await;
    let _lease = client.acquire("memory://live-prices-2");
    let _peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();

    assert_eq!(
        *connector.seen.lock().unwrap(),
        vec![ReadyState::Connecting, ReadyState::Connecting]
    );
}

// ─── Heartbeat ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_every_interval_and_stops_on_disconnect() {
    let (client, mut listener) = memory_client();
    let mut peer = connected(&client, &mut listener).await;

    tokio::time::advance(Duration::from_secs(29)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(peer.drain_requests().is_empty());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(peer.recv_request().await, Some(Request::Ping));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(peer.drain_requests().is_empty(), "exactly one ping per interval");

    client.disconnect();
    tokio::time::advance(Duration::from_secs(90)).await;
    while let Some(frame) = peer.recv().await {
        assert!(matches!(frame, Frame::Close(_)), "no pings after disconnect: {frame:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn zero_interval_disables_heartbeat() {
    init_tracing();
    let (connector, mut listener) = memory::channel();
    let config = StreamConfig {
        heartbeat_interval_ms: 0,
        ..Default::default()
    };
    let client = PriceStreamClient::with_connector(config, connector);
    let mut peer = connected(&client, &mut listener).await;

    tokio::time::advance(Duration::from_secs(120)).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(peer.drain_requests().is_empty());
}

// ─── Leases ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connection_closes_when_last_lease_drops() {
    let (client, mut listener) = memory_client();
    let first = client.acquire(URL);
    let second = client.acquire(URL);
    let mut peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    drop(first);
    assert!(second.is_connected());
    second.send_ping();
    assert_eq!(peer.recv_request().await, Some(Request::Ping));

    drop(second);
    assert!(!client.is_connected());
    assert!(matches!(peer.recv().await, Some(Frame::Close(_))));
}

#[tokio::test]
async fn dropping_a_lease_keeps_an_explicit_connection() {
    let (client, mut listener) = memory_client();
    let mut peer = connected(&client, &mut listener).await;

    drop(client.acquire(URL));
    assert_eq!(client.lease_count(), 0);
    assert!(client.is_connected());
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.send_ping();
    assert_eq!(peer.recv_request().await, Some(Request::Ping));
    assert!(listener.try_accept().is_none());
}

#[tokio::test]
async fn lease_reopens_after_fault() {
    let (client, mut listener) = memory_client();
    let lease = client.acquire(URL);
    let peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    drop(peer);
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let _again = client.acquire(URL);
    let _peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    assert!(lease.is_connected());
    assert_eq!(client.lease_count(), 2);
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn dashboard_sees_literal_nvda_price() {
    let (client, mut listener) = memory_client();
    let lease = client.acquire(URL);
    let mut messages = lease.messages();
    let mut peer = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let mut board = PriceBoard::dashboard();

    peer.send_json(&json!({"type": "connected", "message": "Connected to live prices"}));
    let greeting = next_message(&mut messages).await;
    assert_eq!(greeting.kind(), "connected");
    assert!(!board.apply(&greeting));

    lease.subscribe_to_symbols(["NVDA", "MSFT"]);
    assert_eq!(
        peer.recv_request().await,
        Some(Request::subscribe_symbols(["NVDA", "MSFT"]))
    );

    peer.send_json(&json!({
        "type": "subscribed",
        "symbols": ["NVDA", "MSFT"],
        "message": "Successfully subscribed to symbols"
    }));
    peer.send_json(&price_update("NVDA", 123.45));

    assert!(!board.apply(&next_message(&mut messages).await));
    assert!(board.apply(&next_message(&mut messages).await));

    assert_eq!(board.price("NVDA"), Some(123.45));
    assert_eq!(board.price("MSFT"), None);
}
