//! Live price stream client.
//!
//! One [`PriceStreamClient`] owns at most one physical connection at a time.
//! Each connection is driven by a background tokio task that the public API
//! talks to over an mpsc command channel. Inbound messages are fanned out to
//! every consumer through its own unbounded queue, so a slow reader delays
//! only itself and never loses a message. Connection state lives in a watch
//! channel so late subscribers always see the latest value.
//!
//! Every connection carries a generation number. A task whose generation is
//! no longer current (replaced by a newer `connect`, or released by
//! `disconnect`) can neither publish messages nor change the observed state.

use std::sync::{Arc, Weak};

use futures_util::{future, stream, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::StreamError;
use crate::network::DEFAULT_WS_URL;
use crate::shared::Symbol;
use crate::ws::lease::StreamLease;
use crate::ws::transport::{CloseReason, Connector, Frame, FrameSink, FrameSource, Transport};
use crate::ws::{
    ConnectionState, InboundMessage, MessageStream, ReadyState, Request, StateStream,
    StreamConfig, StreamEvent,
};

// ─── Commands from public API to connection task ─────────────────────────────

enum Command {
    Send(Request),
    Close,
}

// ─── Shared session state ────────────────────────────────────────────────────

/// Handle to the current connection task.
struct Link {
    generation: u64,
    url: String,
    ready: ReadyState,
    cmd_tx: mpsc::Sender<Command>,
}

impl Link {
    /// Ask the task to send a close frame. If the command channel is full the
    /// task still exits once this handle (its last sender) is dropped.
    fn close(self) {
        let _ = self.cmd_tx.try_send(Command::Close);
    }
}

#[derive(Default)]
struct Session {
    link: Option<Link>,
    /// Set when `acquire` opened the current link; only then does the last
    /// lease close it.
    lease_owned: bool,
    fault: Option<StreamError>,
    leases: usize,
    next_generation: u64,
    consumers: Vec<mpsc::UnboundedSender<StreamEvent>>,
}

impl Session {
    fn is_current(&self, generation: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.generation == generation)
    }

    fn open_link(&self) -> Option<&Link> {
        self.link.as_ref().filter(|l| l.ready == ReadyState::Open)
    }
}

struct Inner {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::debug!("Connection state -> {}", state);
        }
    }

    /// Replace whatever link exists with a fresh connection to `url`.
    fn open(self: &Arc<Self>, session: &mut Session, url: &str) {
        if let Some(old) = session.link.take() {
            tracing::info!("Closing existing connection to {} before reconnecting", old.url);
            old.close();
            self.set_state(ConnectionState::Disconnected);
        }

        session.fault = None;
        session.lease_owned = false;
        session.next_generation += 1;
        let generation = session.next_generation;

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_channel_capacity.max(1));
        session.link = Some(Link {
            generation,
            url: url.to_string(),
            ready: ReadyState::Connecting,
            cmd_tx,
        });
        self.set_state(ConnectionState::Connecting);

        tracing::info!("Connecting to {}", url);
        let task = ConnectionTask {
            inner: Arc::downgrade(self),
            connector: Arc::clone(&self.connector),
            generation,
            url: url.to_string(),
            config: self.config.clone(),
            cmd_rx,
        };
        tokio::spawn(task.run());
    }

    fn close(&self, session: &mut Session) {
        if let Some(link) = session.link.take() {
            tracing::info!("Disconnecting from {}", link.url);
            link.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut session = self.session.lock();
        match session.link.as_mut() {
            Some(link) if link.generation == generation => {
                link.ready = ReadyState::Open;
                self.set_state(ConnectionState::Connected);
                true
            }
            _ => false,
        }
    }

    fn publish(&self, generation: u64, message: InboundMessage) -> bool {
        let mut session = self.session.lock();
        if !session.is_current(generation) {
            return false;
        }
        // Dropped streams leave a closed sender behind; prune them here.
        session
            .consumers
            .retain(|tx| tx.send(StreamEvent::Message(message.clone())).is_ok());
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().is_current(generation)
    }

    /// The transport for `generation` has ended. Faults reach every consumer
    /// before the state flips to `Disconnected`, and end their streams.
    fn retire(&self, generation: u64, fault: Option<StreamError>) {
        let mut session = self.session.lock();
        if !session.is_current(generation) {
            return;
        }
        session.link = None;
        if let Some(error) = fault {
            for tx in session.consumers.drain(..) {
                let _ = tx.send(StreamEvent::Fault(error.clone()));
            }
            session.fault = Some(error);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

// ─── Public client ───────────────────────────────────────────────────────────

/// Streaming client for live stock prices.
///
/// Cheap to clone; clones share the same connection, message fan-out and
/// state. All methods return immediately and their effects surface later on
/// [`messages`](Self::messages) and [`connection_states`](Self::connection_states).
///
/// Methods that open a connection spawn a tokio task and must be called from
/// within a tokio runtime.
#[derive(Clone)]
pub struct PriceStreamClient {
    inner: Arc<Inner>,
}

impl PriceStreamClient {
    /// Client backed by `tokio-tungstenite`. Does not connect yet.
    #[cfg(feature = "ws-native")]
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, crate::ws::transport::native::NativeConnector)
    }

    /// Client backed by any [`Connector`].
    pub fn with_connector(config: StreamConfig, connector: impl Connector) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector: Arc::new(connector),
                state_tx,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Open a connection to `url`, closing any existing one first.
    ///
    /// The state is `Connecting` when this returns. It moves to `Connected`
    /// once the handshake completes, or to `Disconnected` after a fault has
    /// been delivered on the message stream.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn connect(&self, url: &str) {
        let mut session = self.inner.session.lock();
        self.inner.open(&mut session, url);
    }

    /// [`connect`](Self::connect) to [`DEFAULT_WS_URL`].
    pub fn connect_default(&self) {
        self.connect(DEFAULT_WS_URL);
    }

    /// Close the connection, if any. Idempotent.
    ///
    /// Affects every consumer of this client, including lease holders.
    pub fn disconnect(&self) {
        let mut session = self.inner.session.lock();
        if session.leases > 0 {
            tracing::warn!("Disconnecting with {} active lease(s)", session.leases);
        }
        self.inner.close(&mut session);
    }

    /// Handle present and transport open. Reads the live handle, not the
    /// cached state signal.
    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().open_link().is_some()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner
            .session
            .lock()
            .link
            .as_ref()
            .map_or(ReadyState::Closed, |l| l.ready)
    }

    /// Latest observed connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to a batch of symbols in one request.
    pub fn subscribe_to_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.dispatch_logged(Request::subscribe_symbols(symbols));
    }

    pub fn subscribe_to_symbol(&self, symbol: impl Into<Symbol>) {
        self.dispatch_logged(Request::subscribe_symbol(symbol));
    }

    pub fn unsubscribe_from_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.dispatch_logged(Request::unsubscribe_symbols(symbols));
    }

    pub fn unsubscribe_from_symbol(&self, symbol: impl Into<Symbol>) {
        self.dispatch_logged(Request::unsubscribe_symbol(symbol));
    }

    /// Manual heartbeat. Does nothing when not connected.
    pub fn send_ping(&self) {
        match self.dispatch(Request::Ping) {
            Ok(()) | Err(StreamError::NotConnected) => {}
            Err(e) => tracing::warn!("Failed to queue ping: {}", e),
        }
    }

    /// A new consumer view of inbound messages.
    ///
    /// Sees every message published after this call, in transport order,
    /// however far behind the reader falls. Yields a single `Err` when the
    /// transport faults and then ends; if the client is already faulted the
    /// error is yielded immediately.
    pub fn messages(&self) -> MessageStream {
        self.attach(true)
    }

    /// Like [`messages`](Self::messages) but ignores a remembered fault, so
    /// a consumer can re-attach right after its stream ended.
    pub(crate) fn live_messages(&self) -> MessageStream {
        self.attach(false)
    }

    fn attach(&self, replay_fault: bool) -> MessageStream {
        let mut session = self.inner.session.lock();
        if replay_fault {
            if let Some(error) = session.fault.clone() {
                return Box::pin(stream::once(future::ready(Err::<InboundMessage, _>(error))));
            }
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.consumers.push(tx);
        drop(session);

        Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Message(message) => yield Ok(message),
                    StreamEvent::Fault(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        })
    }

    /// Connection state changes, starting with the current state.
    ///
    /// Replay-latest: a slow reader may miss intermediate states but never
    /// sees the same state twice in a row.
    pub fn connection_states(&self) -> StateStream {
        let mut rx = self.inner.state_tx.subscribe();
        Box::pin(async_stream::stream! {
            let mut last = *rx.borrow_and_update();
            yield last;
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                if state != last {
                    last = state;
                    yield state;
                }
            }
        })
    }

    /// Take a share of the connection to `url`.
    ///
    /// Opens the connection when no link to `url` exists (including after a
    /// fault). A connection opened this way closes when the last lease is
    /// dropped; one opened by [`connect`](Self::connect) stays up until
    /// [`disconnect`](Self::disconnect).
    pub fn acquire(&self, url: &str) -> StreamLease {
        let mut session = self.inner.session.lock();
        session.leases += 1;
        let reopen = match session.link.as_ref().map(|l| l.url == url) {
            Some(true) => false,
            Some(false) => {
                tracing::warn!("Lease for {} replaces the current connection", url);
                true
            }
            None => true,
        };
        if reopen {
            self.inner.open(&mut session, url);
            session.lease_owned = true;
        }
        tracing::debug!("Lease acquired ({} active)", session.leases);
        StreamLease::new(self.clone())
    }

    /// Number of live [`StreamLease`]s.
    pub fn lease_count(&self) -> usize {
        self.inner.session.lock().leases
    }

    pub(crate) fn release(&self) {
        let mut session = self.inner.session.lock();
        session.leases = session.leases.saturating_sub(1);
        tracing::debug!("Lease released ({} active)", session.leases);
        if session.leases == 0 && session.lease_owned && session.link.is_some() {
            tracing::info!("Last lease released");
            self.inner.close(&mut session);
        }
    }

    fn dispatch(&self, request: Request) -> Result<(), StreamError> {
        let session = self.inner.session.lock();
        let link = session.open_link().ok_or(StreamError::NotConnected)?;
        link.cmd_tx
            .try_send(Command::Send(request))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    StreamError::SendFailed("Command channel full".into())
                }
                mpsc::error::TrySendError::Closed(_) => StreamError::ChannelClosed,
            })
    }

    fn dispatch_logged(&self, request: Request) {
        let summary = format!("{:?}", request);
        match self.dispatch(request) {
            Ok(()) => tracing::debug!("Queued request: {}", summary),
            Err(StreamError::NotConnected) => {
                tracing::error!("WebSocket is not connected, dropping request: {}", summary)
            }
            Err(e) => tracing::warn!("Failed to queue request {}: {}", summary, e),
        }
    }
}

#[cfg(feature = "ws-native")]
impl Default for PriceStreamClient {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl std::fmt::Debug for PriceStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStreamClient")
            .field("state", &self.connection_state())
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

// ─── Connection task ─────────────────────────────────────────────────────────

/// Why the connected loop ended.
enum Ending {
    /// `disconnect`, a replacing `connect`, or every client handle dropped.
    Requested,
    /// Server sent a close frame.
    ServerClosed(Option<CloseReason>),
    Failed(StreamError),
    /// This generation was replaced while a message was in flight.
    Superseded,
}

struct ConnectionTask {
    inner: Weak<Inner>,
    connector: Arc<dyn Connector>,
    generation: u64,
    url: String,
    config: StreamConfig,
    cmd_rx: mpsc::Receiver<Command>,
}

impl ConnectionTask {
    async fn run(mut self) {
        // ── 1. Handshake ─────────────────────────────────────────────────
        if !self.is_current() {
            tracing::debug!("Connection to {} superseded before dialing", self.url);
            return;
        }
        // Connectors run outside the session lock.
        let connect = self.connector.connect(&self.url);
        let timeout = self.config.connect_timeout();
        let attempt = tokio::select! {
            result = tokio::time::timeout(timeout, connect) => result,
            _ = self.cmd_rx.recv() => {
                tracing::debug!("Connection to {} abandoned during handshake", self.url);
                return;
            }
        };

        let Transport { mut sink, source } = match attempt {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                tracing::error!("WebSocket connection failed: {}", e);
                self.retire(Some(e));
                return;
            }
            Err(_) => {
                tracing::error!("WebSocket connection to {} timed out after {:?}", self.url, timeout);
                self.retire(Some(StreamError::Timeout));
                return;
            }
        };

        // ── 2. Open ──────────────────────────────────────────────────────
        let opened = self
            .inner
            .upgrade()
            .is_some_and(|inner| inner.mark_open(self.generation));
        if !opened {
            tracing::debug!("Connection to {} superseded before it opened", self.url);
            let _ = sink.send(Frame::Close(Some(CloseReason::normal("Superseded")))).await;
            return;
        }
        tracing::info!("WebSocket connected: {}", self.url);

        // ── 3. Connected loop ────────────────────────────────────────────
        match self.run_connected(&mut sink, source).await {
            Ending::Requested => {
                let _ = sink
                    .send(Frame::Close(Some(CloseReason::normal("Client disconnect"))))
                    .await;
                tracing::debug!("Connection to {} closed by client", self.url);
            }
            Ending::Superseded => {
                let _ = sink.send(Frame::Close(Some(CloseReason::normal("Superseded")))).await;
            }
            Ending::ServerClosed(reason) => {
                match reason {
                    Some(r) => tracing::info!(
                        "WebSocket closed by server: code {}, reason: {}",
                        r.code,
                        r.reason
                    ),
                    None => tracing::info!("WebSocket closed by server"),
                }
                self.retire(None);
            }
            Ending::Failed(e) => {
                tracing::error!("WebSocket error: {}", e);
                self.retire(Some(e));
            }
        }
    }

    async fn run_connected(&mut self, sink: &mut FrameSink, mut source: FrameSource) -> Ending {
        let mut heartbeat = self.config.heartbeat_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                // Commands first so a close always beats a due heartbeat.
                biased;

                // ── a) Command from public API ───────────────────────────
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(request)) => {
                        if let Err(e) = send_request(sink, &request).await {
                            tracing::warn!("Send failed: {}", e);
                        }
                    }
                    Some(Command::Close) | None => return Ending::Requested,
                },

                // ── b) Incoming frame ────────────────────────────────────
                frame = source.next() => match frame {
                    Some(Ok(Frame::Text(text))) => match InboundMessage::parse(&text) {
                        Ok(message) => {
                            tracing::debug!("Received {} message", message.kind());
                            if !self.publish(message) {
                                return Ending::Superseded;
                            }
                        }
                        Err(e) => tracing::warn!("Dropping unparseable frame: {} - raw: {}", e, text),
                    },
                    Some(Ok(Frame::Close(reason))) => return Ending::ServerClosed(reason),
                    Some(Err(e)) => return Ending::Failed(e),
                    None => return Ending::Failed(StreamError::abnormal_closure()),
                },

                // ── c) Heartbeat ─────────────────────────────────────────
                _ = next_heartbeat(&mut heartbeat) => {
                    if !self.is_current() {
                        return Ending::Superseded;
                    }
                    match send_request(sink, &Request::Ping).await {
                        Ok(()) => tracing::debug!("Heartbeat ping sent"),
                        Err(e) => tracing::warn!("Failed to send ping: {}", e),
                    }
                }
            }
        }
    }

    fn publish(&self, message: InboundMessage) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.publish(self.generation, message))
    }

    fn is_current(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.is_current(self.generation))
    }

    fn retire(&self, fault: Option<StreamError>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.retire(self.generation, fault);
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Serialize and send a request over the sink.
async fn send_request(sink: &mut FrameSink, request: &Request) -> Result<(), StreamError> {
    let json = request.to_json()?;
    sink.send(Frame::Text(json)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::transport::memory;
    use futures_util::StreamExt;
    use serde_json::json;

    fn client() -> (PriceStreamClient, memory::MemoryListener) {
        let (connector, listener) = memory::channel();
        (PriceStreamClient::with_connector(StreamConfig::default(), connector), listener)
    }

    async fn wait_for(client: &PriceStreamClient, wanted: ConnectionState) {
        let mut states = client.connection_states();
        while let Some(state) = states.next().await {
            if state == wanted {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_connect_sets_connecting_synchronously() {
        let (client, _listener) = client();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        client.connect("memory://live-prices");
        assert_eq!(client.connection_state(), ConnectionState::Connecting);
        assert_eq!(client.ready_state(), ReadyState::Connecting);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_open_then_disconnect() {
        let (client, mut listener) = client();
        client.connect("memory://live-prices");
        let _peer = listener.accept().await.unwrap();
        wait_for(&client, ConnectionState::Connected).await;
        assert!(client.is_connected());
        assert_eq!(client.ready_state(), ReadyState::Open);

        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dispatch_requires_open_link() {
        let (client, _listener) = client();
        assert_eq!(client.dispatch(Request::Ping), Err(StreamError::NotConnected));
        client.connect("memory://live-prices");
        assert_eq!(client.dispatch(Request::Ping), Err(StreamError::NotConnected));
    }

    #[tokio::test]
    async fn test_refused_connect_faults() {
        let (client, listener) = client();
        drop(listener);
        let mut messages = client.messages();
        client.connect("memory://live-prices");

        let item = messages.next().await.unwrap();
        assert!(matches!(item, Err(StreamError::ConnectionFailed(_))));
        assert!(messages.next().await.is_none());
        wait_for(&client, ConnectionState::Disconnected).await;

        // Late consumers see the remembered fault.
        let mut late = client.messages();
        assert!(matches!(late.next().await, Some(Err(StreamError::ConnectionFailed(_)))));
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let (client, mut listener) = client();
        client.connect("memory://first");
        let first = listener.accept().await.unwrap();
        wait_for(&client, ConnectionState::Connected).await;

        client.connect("memory://second");
        let second = listener.accept().await.unwrap();
        wait_for(&client, ConnectionState::Connected).await;

        let mut messages = client.messages();
        first.send_json(&json!({"type": "info", "message": "stale"}));
        second.send_json(&json!({"type": "info", "message": "fresh"}));

        match messages.next().await {
            Some(Ok(InboundMessage::Info(p))) => assert_eq!(p.message, "fresh"),
            other => panic!("expected fresh info, got {other:?}"),
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_lease_count_tracks_drops() {
        let (client, mut listener) = client();
        let a = client.acquire("memory://live-prices");
        let b = client.acquire("memory://live-prices");
        let _peer = listener.accept().await.unwrap();
        assert!(listener.try_accept().is_none());
        assert_eq!(client.lease_count(), 2);

        drop(a);
        assert_eq!(client.lease_count(), 1);
        assert_ne!(client.connection_state(), ConnectionState::Disconnected);

        drop(b);
        assert_eq!(client.lease_count(), 0);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}
