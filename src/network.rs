//! Network URL constants for the live price stream.

/// Path of the live price WebSocket endpoint.
pub const LIVE_PRICES_PATH: &str = "/live-prices";

/// Default WebSocket base URL (local development server).
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8080";

/// Default live price WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/live-prices";

/// Join a WebSocket base URL with the live price path.
pub fn live_prices_url(base: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), LIVE_PRICES_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_matches_base_and_path() {
        assert_eq!(live_prices_url(DEFAULT_WS_BASE_URL), DEFAULT_WS_URL);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(
            live_prices_url("wss://prices.example.com/"),
            "wss://prices.example.com/live-prices"
        );
    }
}
