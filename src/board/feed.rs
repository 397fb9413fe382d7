//! Keeps a [`PriceBoard`] current from a live price stream.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::board::state::PriceBoard;
use crate::shared::Symbol;
use crate::ws::{ConnectionState, MessageStream, PriceStreamClient, StreamLease};

/// A board wired to a price stream.
///
/// Holds a [`StreamLease`] for its lifetime. A background task subscribes
/// every tracked symbol each time the connection becomes `Connected`, folds
/// inbound messages into the board and bumps a revision counter whenever the
/// board changes. Consumers re-render off [`changes`](Self::changes).
///
/// After a transport fault the feed re-attaches at once and waits; whatever
/// the next connection delivers reaches the board, even before the feed has
/// seen it become `Connected`.
pub struct BoardFeed {
    lease: StreamLease,
    board: Arc<RwLock<PriceBoard>>,
    revision: Arc<watch::Sender<u64>>,
    task: JoinHandle<()>,
}

impl BoardFeed {
    /// Acquire a lease on `url` and start feeding `board`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(client: &PriceStreamClient, url: &str, board: PriceBoard) -> Self {
        let board = Arc::new(RwLock::new(board));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);

        // Attach before the lease can open the connection so nothing is missed.
        // A fault left over from earlier use of the client is not ours.
        let messages = client.live_messages();
        let states = client.connection_states();
        let lease = client.acquire(url);

        let task = tokio::spawn(run_feed(
            client.clone(),
            messages,
            states,
            Arc::clone(&board),
            Arc::clone(&revision),
        ));

        Self {
            lease,
            board,
            revision,
            task,
        }
    }

    /// Track another stock; subscribes right away when connected.
    ///
    /// Returns `false` if the symbol was already on the board.
    pub fn add_stock(&self, symbol: impl Into<Symbol>, name: impl Into<String>) -> bool {
        let symbol = symbol.into();
        if !self.board.write().track(symbol.clone(), name) {
            return false;
        }
        bump(&self.revision);
        if self.lease.is_connected() {
            self.lease.subscribe_to_symbol(symbol);
        }
        true
    }

    /// Copy of the board as it stands.
    pub fn snapshot(&self) -> PriceBoard {
        self.board.read().clone()
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.board.read().price(symbol)
    }

    /// Revision counter, bumped on every visible change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lease.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.lease.is_connected()
    }
}

impl Drop for BoardFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for BoardFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardFeed")
            .field("board", &*self.board.read())
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

fn bump(revision: &watch::Sender<u64>) {
    revision.send_modify(|r| *r += 1);
}

async fn run_feed(
    client: PriceStreamClient,
    mut messages: MessageStream,
    mut states: crate::ws::StateStream,
    board: Arc<RwLock<PriceBoard>>,
    revision: Arc<watch::Sender<u64>>,
) {
    loop {
        tokio::select! {
            // Drain messages first so a fault is seen before the next `Connected`.
            biased;

            item = messages.next() => match item {
                Some(Ok(message)) => {
                    if board.write().apply(&message) {
                        bump(&revision);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Price feed interrupted, waiting for the next connection: {}", e);
                    messages = client.live_messages();
                }
                None => return,
            },

            state = states.next() => match state {
                Some(ConnectionState::Connected) => {
                    let symbols = board.read().symbols();
                    if !symbols.is_empty() {
                        client.subscribe_to_symbols(symbols);
                    }
                }
                Some(_) => {}
                None => return,
            },
        }
    }
}
