//! Transport seam between the client and the physical socket.
//!
//! A [`Connector`] turns a URL into a pair of boxed halves that carry
//! [`Frame`]s. The client never touches sockets directly, so the same
//! connection task drives `tokio-tungstenite` in production and in-process
//! channels in tests.

pub mod memory;

#[cfg(feature = "ws-native")]
pub mod native;

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::error::StreamError;

/// A frame as seen by the connection task.
///
/// WebSocket-level ping/pong and binary frames are handled (or dropped) by the
/// transport and never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(Option<CloseReason>),
}

/// Close code and reason from a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: 1000,
            reason: reason.into(),
        }
    }
}

/// Write half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = StreamError> + Send>>;

/// Read half of a transport. Ends when the peer goes away.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<Frame, StreamError>> + Send>>;

/// An established transport.
pub struct Transport {
    pub sink: FrameSink,
    pub source: FrameSource,
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Transport, StreamError>> + Send>>;

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> ConnectFuture;
}
