//! Price board state: tracked stocks in display order with their last price.

use chrono::{DateTime, Utc};

use crate::shared::Symbol;
use crate::ws::InboundMessage;

/// The dashboard's default watchlist, in display order.
pub const DASHBOARD_STOCKS: [(&str, &str); 6] = [
    ("NVDA", "NVIDIA"),
    ("MSFT", "Microsoft"),
    ("AAPL", "Apple"),
    ("GOOGL", "Google"),
    ("AMZN", "Amazon"),
    ("META", "Meta"),
];

/// One row on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedStock {
    pub symbol: Symbol,
    pub name: String,
    /// Last traded price; `None` until the first update arrives.
    pub price: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Stocks a consumer tracks, with the last price seen for each.
///
/// The consumer owns the board; [`apply`](Self::apply) folds inbound messages
/// into it and reports whether anything visible changed.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    stocks: Vec<TrackedStock>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board preloaded with [`DASHBOARD_STOCKS`].
    pub fn dashboard() -> Self {
        let mut board = Self::new();
        for (symbol, name) in DASHBOARD_STOCKS {
            board.track(symbol, name);
        }
        board
    }

    /// Start tracking `symbol`. Returns `false` if it was already tracked.
    pub fn track(&mut self, symbol: impl Into<Symbol>, name: impl Into<String>) -> bool {
        let symbol = symbol.into();
        if self.is_tracking(symbol.as_str()) {
            return false;
        }
        self.stocks.push(TrackedStock {
            symbol,
            name: name.into(),
            price: None,
            updated_at: None,
        });
        true
    }

    pub fn is_tracking(&self, symbol: &str) -> bool {
        self.stock(symbol).is_some()
    }

    pub fn stock(&self, symbol: &str) -> Option<&TrackedStock> {
        self.stocks.iter().find(|s| s.symbol == symbol)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.stock(symbol).and_then(|s| s.price)
    }

    /// Tracked symbols in display order.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.stocks.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn stocks(&self) -> &[TrackedStock] {
        &self.stocks
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }

    /// Fold one inbound message into the board.
    ///
    /// Only a `price_update` for a tracked symbol changes anything; every
    /// other kind is logged. Returns `true` when the board changed.
    pub fn apply(&mut self, message: &InboundMessage) -> bool {
        match message {
            InboundMessage::Connected(p) => {
                tracing::info!(
                    "Price stream ready: {}",
                    p.message.as_deref().unwrap_or("connected")
                );
                false
            }
            InboundMessage::Subscribed(p) => {
                let symbols: Vec<&str> = p.symbols.iter().map(|s| s.as_str()).collect();
                tracing::info!("Subscribed to {} symbol(s): {:?}", symbols.len(), symbols);
                false
            }
            InboundMessage::PriceUpdate(p) => {
                let tick = &p.data;
                let Some(stock) = self.stocks.iter_mut().find(|s| s.symbol == tick.symbol) else {
                    tracing::debug!("Ignoring price for untracked symbol {}", tick.symbol);
                    return false;
                };
                stock.price = Some(tick.price);
                stock.updated_at = Some(tick.observed_at().unwrap_or_else(Utc::now));
                true
            }
            InboundMessage::Pong(p) => {
                tracing::debug!("Pong (server time {:?})", p.server_time());
                false
            }
            InboundMessage::Error(p) => {
                tracing::error!("Price stream error: {}", p.message);
                false
            }
            InboundMessage::Info(p) => {
                tracing::info!("Price stream: {}", p.message);
                false
            }
            InboundMessage::Unknown(_) => {
                tracing::warn!("Unknown message type: {}", message.kind());
                false
            }
        }
    }
}
