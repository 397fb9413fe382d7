//! Reference consumer: a watchlist of stocks kept current from the stream.
//!
//! [`PriceBoard`] is plain state with the message dispatch logic;
//! [`BoardFeed`] wires a board to a client through a lease.

pub mod feed;
pub mod state;

pub use feed::BoardFeed;
pub use state::{PriceBoard, TrackedStock, DASHBOARD_STOCKS};
