//! # StockPulse Live
//!
//! Client for the StockPulse live price stream: a text-framed JSON protocol
//! over WebSocket that pushes price updates for the symbols a client
//! subscribes to.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: the `Symbol` newtype, errors and endpoint URLs
//! 2. **WebSocket**: message types, the transport seam and
//!    [`PriceStreamClient`](ws::PriceStreamClient) with its leases
//! 3. **Board**: a reference consumer that keeps a watchlist current
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stockpulse_live::prelude::*;
//!
//! let client = PriceStreamClient::new(StreamConfig::default());
//! let lease = client.acquire(DEFAULT_WS_URL);
//!
//! let mut messages = lease.messages();
//! lease.subscribe_to_symbols(["NVDA", "MSFT"]);
//! while let Some(Ok(message)) = messages.next().await {
//!     if let Some(tick) = message.price_tick() {
//!         println!("{} {}", tick.symbol, tick.price);
//!     }
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes.
pub mod shared;

/// Error types.
pub mod error;

/// Endpoint URL constants.
pub mod network;

// ── Layer 2: WebSocket ───────────────────────────────────────────────────────

/// WebSocket client: messages, connection state, transports, leases.
pub mod ws;

// ── Layer 3: Board ───────────────────────────────────────────────────────────

/// Watchlist state kept current from the stream.
pub mod board;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    pub use crate::shared::Symbol;

    pub use crate::error::{StreamError, StreamResult};
    pub use crate::network::{live_prices_url, DEFAULT_WS_URL};

    pub use crate::ws::transport::Connector;
    pub use crate::ws::{
        ConnectionState, InboundMessage, MessageStream, PriceStreamClient, PriceTick,
        ReadyState, Request, StateStream, StreamConfig, StreamLease, SymbolSelection,
    };

    pub use crate::board::{BoardFeed, PriceBoard, TrackedStock};

    pub use futures_util::StreamExt;
}
