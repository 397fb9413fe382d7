//! Reference-counted share of a client's connection.

use crate::shared::Symbol;
use crate::ws::client::PriceStreamClient;
use crate::ws::{ConnectionState, MessageStream, StateStream};

/// A consumer's share of the physical connection.
///
/// Obtained from [`PriceStreamClient::acquire`]. Exposes everything a consumer
/// needs except `disconnect`. A connection opened by a lease closes when the
/// last lease is dropped; one opened by an explicit `connect` is left alone.
#[derive(Debug)]
pub struct StreamLease {
    client: PriceStreamClient,
}

impl StreamLease {
    pub(crate) fn new(client: PriceStreamClient) -> Self {
        Self { client }
    }

    pub fn subscribe_to_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.client.subscribe_to_symbols(symbols);
    }

    pub fn subscribe_to_symbol(&self, symbol: impl Into<Symbol>) {
        self.client.subscribe_to_symbol(symbol);
    }

    pub fn unsubscribe_from_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        self.client.unsubscribe_from_symbols(symbols);
    }

    pub fn unsubscribe_from_symbol(&self, symbol: impl Into<Symbol>) {
        self.client.unsubscribe_from_symbol(symbol);
    }

    pub fn send_ping(&self) {
        self.client.send_ping();
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    pub fn messages(&self) -> MessageStream {
        self.client.messages()
    }

    pub fn connection_states(&self) -> StateStream {
        self.client.connection_states()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.client.release();
    }
}
