//! Error types for the live price stream.

use thiserror::Error;

/// Errors surfaced by the streaming client.
///
/// Payloads are plain strings so the error can be cloned onto every
/// consumer's message stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// No open connection
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// Handshake or transport setup failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Connect attempt exceeded the configured timeout
    #[error("Connection timed out")]
    Timeout,

    /// Writing a frame failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Connection closed without a clean close handshake
    #[error("Connection closed unexpectedly: code {code}, reason: {reason}")]
    Closed { code: u16, reason: String },

    /// JSON (de)serialization failure
    #[error("Failed to parse message: {0}")]
    Deserialization(String),

    /// Internal channel closed
    #[error("Internal channel closed")]
    ChannelClosed,
}

impl StreamError {
    /// Abnormal closure (1006): the peer went away without a close frame.
    pub fn abnormal_closure() -> Self {
        StreamError::Closed {
            code: 1006,
            reason: "Stream ended without close frame".to_string(),
        }
    }
}

#[cfg(feature = "ws-native")]
impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => StreamError::abnormal_closure(),
            Error::Io(e) => StreamError::Io(e.to_string()),
            Error::Protocol(e) => StreamError::Protocol(e.to_string()),
            Error::Url(e) => StreamError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                StreamError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            Error::HttpFormat(e) => StreamError::ConnectionFailed(e.to_string()),
            other => StreamError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Deserialization(err.to_string())
    }
}

/// Result type alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;
