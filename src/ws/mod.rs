//! WebSocket layer: message types plus connection state and config.
//!
//! The client lives in [`client`]; the physical transport sits behind the
//! [`transport::Connector`] trait:
//! - `ws-native` feature → `tokio-tungstenite` ([`transport::native`])
//! - always available → in-process channels ([`transport::memory`])
//!
//! This module defines the shared message and state types.

pub mod client;
pub mod lease;
pub mod subscriptions;
pub mod transport;

use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::shared::Symbol;

pub use client::PriceStreamClient;
pub use lease::StreamLease;
pub use subscriptions::SymbolSelection;

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Requests sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Subscribe(SymbolSelection),
    Unsubscribe(SymbolSelection),
    Ping,
}

impl Request {
    pub fn subscribe_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Request::Subscribe(SymbolSelection::batch(symbols))
    }

    pub fn subscribe_symbol(symbol: impl Into<Symbol>) -> Self {
        Request::Subscribe(SymbolSelection::single(symbol))
    }

    pub fn unsubscribe_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Request::Unsubscribe(SymbolSelection::batch(symbols))
    }

    pub fn unsubscribe_symbol(symbol: impl Into<Symbol>) -> Self {
        Request::Unsubscribe(SymbolSelection::single(symbol))
    }

    pub fn ping() -> Self {
        Request::Ping
    }

    pub fn to_json(&self) -> StreamResult<String> {
        serde_json::to_string(self).map_err(StreamError::from)
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// A message pushed by the server, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Greeting sent right after the socket opens.
    Connected(ConnectedPayload),
    /// Acknowledges the most recent subscribe request (not correlated).
    Subscribed(SubscribedPayload),
    PriceUpdate(PriceUpdatePayload),
    Pong(PongPayload),
    /// Application-level error; the connection stays open.
    Error(ErrorPayload),
    Info(InfoPayload),
    /// Any other `type`, or a known `type` with an unexpected shape.
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectedPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscribedPayload {
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceUpdatePayload {
    pub data: PriceTick,
}

/// One price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: f64,
    /// Epoch millis, when the feed stamped it.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl PriceTick {
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PongPayload {
    /// Server clock, epoch millis.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl PongPayload {
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfoPayload {
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Tagged {
    #[serde(rename = "connected")]
    Connected(ConnectedPayload),
    #[serde(rename = "subscribed")]
    Subscribed(SubscribedPayload),
    #[serde(rename = "price_update")]
    PriceUpdate(PriceUpdatePayload),
    #[serde(rename = "pong")]
    Pong(PongPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "info")]
    Info(InfoPayload),
}

impl From<Tagged> for InboundMessage {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Connected(p) => InboundMessage::Connected(p),
            Tagged::Subscribed(p) => InboundMessage::Subscribed(p),
            Tagged::PriceUpdate(p) => InboundMessage::PriceUpdate(p),
            Tagged::Pong(p) => InboundMessage::Pong(p),
            Tagged::Error(p) => InboundMessage::Error(p),
            Tagged::Info(p) => InboundMessage::Info(p),
        }
    }
}

impl InboundMessage {
    /// Parse one text frame.
    ///
    /// Fails only when the frame is not JSON at all; anything that parses but
    /// does not match a known shape becomes [`InboundMessage::Unknown`].
    pub fn parse(text: &str) -> StreamResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        match Tagged::deserialize(&value) {
            Ok(tagged) => Ok(tagged.into()),
            Err(e) => {
                tracing::debug!("Unrecognised message shape ({}): {}", e, value);
                Ok(InboundMessage::Unknown(value))
            }
        }
    }

    /// The wire `type` of this message (`"unknown"` when absent).
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::Connected(_) => "connected",
            InboundMessage::Subscribed(_) => "subscribed",
            InboundMessage::PriceUpdate(_) => "price_update",
            InboundMessage::Pong(_) => "pong",
            InboundMessage::Error(_) => "error",
            InboundMessage::Info(_) => "info",
            InboundMessage::Unknown(value) => value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown"),
        }
    }

    pub fn price_tick(&self) -> Option<&PriceTick> {
        match self {
            InboundMessage::PriceUpdate(p) => Some(&p.data),
            _ => None,
        }
    }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Logical connection state as observed by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

/// Ready-state of the current transport handle.
///
/// There is no closing phase: `disconnect` drops the handle before the close
/// frame goes out, so the state reads `Closed` straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

// ─── Streams handed to consumers ─────────────────────────────────────────────

/// Per-consumer view of inbound messages. Ends after yielding a transport error.
pub type MessageStream = Pin<Box<dyn Stream<Item = StreamResult<InboundMessage>> + Send>>;

/// Replay-latest view of the connection state.
pub type StateStream = Pin<Box<dyn Stream<Item = ConnectionState> + Send>>;

/// Item queued to each consumer.
#[derive(Debug, Clone)]
pub(crate) enum StreamEvent {
    Message(InboundMessage),
    Fault(StreamError),
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Heartbeat period while the socket is open. `0` disables the heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout_ms: u64,
    /// Outbound requests buffered for the connection task.
    pub command_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 30_000,
            command_channel_capacity: 100,
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
