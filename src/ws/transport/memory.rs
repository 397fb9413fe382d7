//! In-process transport backed by tokio channels.
//!
//! [`channel`] returns a connector for the client and a listener that plays the
//! server: every `connect` shows up on the listener as a [`MemoryPeer`] that
//! can push frames to the client and read what the client wrote. Nothing here
//! touches sockets or timers, so it runs deterministically under a paused
//! tokio clock.

use futures_util::{sink, stream};
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::ws::transport::{CloseReason, ConnectFuture, Connector, Frame, Transport};
use crate::ws::Request;

/// Create a connected connector/listener pair.
pub fn channel() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryConnector { accept_tx }, MemoryListener { accept_rx })
}

/// Client side: hands each connection attempt to the listener.
///
/// Connecting fails with [`StreamError::ConnectionFailed`] once the listener
/// has been dropped.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client,
            from_client,
        };
        let accepted = self.accept_tx.send(peer).is_ok();

        Box::pin(async move {
            if !accepted {
                return Err(StreamError::ConnectionFailed("connection refused".to_string()));
            }

            let sink = sink::unfold(to_server, |tx: mpsc::UnboundedSender<Frame>, frame: Frame| async move {
                tx.send(frame)
                    .map_err(|_| StreamError::SendFailed("peer went away".to_string()))?;
                Ok::<_, StreamError>(tx)
            });

            let source = stream::unfold(from_server, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });

            Ok(Transport {
                sink: Box::pin(sink),
                source: Box::pin(source),
            })
        })
    }
}

/// Server side: yields one [`MemoryPeer`] per connection attempt.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// The server end of one in-process connection.
///
/// Dropping it ends the client's read half without a close frame, which the
/// client treats as an abnormal closure.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: mpsc::UnboundedSender<Result<Frame, StreamError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// URL the client asked for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a text frame. Returns `false` once the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(Frame::Text(text.into()))).is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Clean close handshake from the server.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let reason = CloseReason {
            code,
            reason: reason.into(),
        };
        self.to_client.send(Ok(Frame::Close(Some(reason)))).is_ok()
    }

    /// Inject a transport-level read error.
    pub fn fail(&self, error: StreamError) -> bool {
        self.to_client.send(Err(error)).is_ok()
    }

    /// Next frame written by the client; `None` once the client dropped its
    /// write half.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Next request written by the client, skipping close frames.
    pub async fn recv_request(&mut self) -> Option<Request> {
        while let Some(frame) = self.recv().await {
            if let Frame::Text(text) = frame {
                match serde_json::from_str(&text) {
                    Ok(request) => return Some(request),
                    Err(e) => tracing::warn!("Peer received non-request frame ({}): {}", e, text),
                }
            }
        }
        None
    }

    /// Requests already written by the client, without waiting.
    pub fn drain_requests(&mut self) -> Vec<Request> {
        let mut requests = Vec::new();
        while let Some(frame) = self.try_recv() {
            if let Frame::Text(text) = frame {
                if let Ok(request) = serde_json::from_str(&text) {
                    requests.push(request);
                }
            }
        }
        requests
    }
}
