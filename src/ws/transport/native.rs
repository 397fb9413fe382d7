//! Native transport over `tokio-tungstenite`.

use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::StreamError;
use crate::ws::transport::{CloseReason, ConnectFuture, Connector, Frame, Transport};

/// Connects over `ws://` / `wss://` with `tokio-tungstenite`.
///
/// The handshake itself is unbounded; the client wraps it in
/// [`StreamConfig::connect_timeout`](crate::ws::StreamConfig::connect_timeout).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let url = url.to_string();

        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str()).await?;

            let (sink, stream) = ws_stream.split();

            let sink = sink
                .sink_map_err(StreamError::from)
                .with(|frame: Frame| future::ready(Ok::<_, StreamError>(to_message(frame))));

            let source = stream.filter_map(|msg| future::ready(from_message(msg)));

            Ok::<_, StreamError>(Transport {
                sink: Box::pin(sink),
                source: Box::pin(source),
            })
        })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// `None` for frames the client does not care about (binary, WS ping/pong).
/// Pings are answered by tungstenite itself on the next read.
fn from_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<Frame, StreamError>> {
    match msg {
        Ok(Message::Text(text)) => {
            let text: &str = text.as_ref();
            Some(Ok(Frame::Text(text.to_owned())))
        }
        Ok(Message::Close(frame)) => Some(Ok(Frame::Close(frame.map(|f| CloseReason {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned(),
        })))),
        Ok(_) => None,
        Err(e) => Some(Err(StreamError::from(e))),
    }
}
