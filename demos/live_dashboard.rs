//! Live dashboard in the terminal.
//!
//! Tracks the default watchlist and prints the board every time a price
//! changes.
//!
//! ```bash
//! RUST_LOG=stockpulse_live=debug cargo run --example live_dashboard -- ws://localhost:8080/live-prices
//! ```

use stockpulse_live::board::{BoardFeed, PriceBoard};
use stockpulse_live::network::DEFAULT_WS_URL;
use stockpulse_live::ws::{PriceStreamClient, StreamConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stockpulse_live=info")),
        )
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_WS_URL.to_string());

    let client = PriceStreamClient::new(StreamConfig::default());
    let feed = BoardFeed::start(&client, &url, PriceBoard::dashboard());
    let mut changes = feed.changes();

    println!("Streaming from {url} (Ctrl-C to quit)");

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                print_board(&feed.snapshot(), &feed.connection_state().to_string());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(feed);
    println!("Disconnected");
}

fn print_board(board: &PriceBoard, state: &str) {
    println!("── {} ──", state);
    for stock in board.stocks() {
        match stock.price {
            Some(price) => println!("{:<6} {:<10} {:>10.2}", stock.symbol.as_str(), stock.name, price),
            None => println!("{:<6} {:<10} {:>10}", stock.symbol.as_str(), stock.name, "--"),
        }
    }
}
