//! Frame transport seam.
//!
//! A [`Transport`] is one accepted socket split into a [`FrameSource`]
//! (inbound frames) and a [`FrameSink`] (outbound frames). The axum
//! `WebSocket` is the production implementation; [`MemoryTransport`] backs
//! tests with plain channels.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

/// One inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Keepalive ping from the peer.
    Ping,
    /// Keepalive answer from the peer.
    Pong,
    /// Peer is closing.
    Close,
}

/// Transport-level failures. Fatal to the connection that sees them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Socket reported an error.
    #[error("transport error: {0}")]
    Io(String),
    /// Peer stopped answering pings.
    #[error("peer unresponsive for {0:?}")]
    Unresponsive(std::time::Duration),
}

/// Read half.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next frame. `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Write half.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write a text frame.
    async fn send_text(&mut self, text: Arc<str>) -> Result<(), TransportError>;

    /// Write a ping frame.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Close the write side.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted socket, split into its two halves.
pub struct Transport {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) sink: Box<dyn FrameSink>,
}

impl Transport {
    /// Pair a source with a sink.
    pub fn new(source: impl FrameSource, sink: impl FrameSink) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

impl From<WebSocket> for Transport {
    fn from(socket: WebSocket) -> Self {
        let (sink, source) = socket.split();
        Self::new(source, sink)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = match self.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };
        Some(Ok(match message {
            Message::Text(text) => Frame::Text(text.to_string()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(_) => Frame::Ping,
            Message::Pong(_) => Frame::Pong,
            Message::Close(_) => Frame::Close,
        }))
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: Arc<str>) -> Result<(), TransportError> {
        self.send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// What the server wrote to a [`MemoryClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    /// Text frame.
    Text(String),
    /// Ping frame.
    Ping,
    /// Server closed its write side.
    Close,
}

/// Channel-backed transport for tests and embedding.
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a connected transport/client pair.
    #[must_use]
    pub fn pair() -> (Transport, MemoryClient) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let transport = Transport::new(
            MemorySource { rx: from_client },
            MemorySink {
                tx: to_client,
                fail_writes: false,
            },
        );
        let client = MemoryClient {
            tx: Some(to_server),
            rx: from_server,
        };
        (transport, client)
    }

    /// Pair whose sink fails every write.
    #[must_use]
    pub fn broken_writer() -> (Transport, MemoryClient) {
        let (mut transport, client) = Self::pair();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.sink = Box::new(MemorySink {
            tx,
            fail_writes: true,
        });
        (transport, client)
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<ServerFrame>,
    fail_writes: bool,
}

impl MemorySink {
    fn push(&self, frame: ServerFrame) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Io("write failed".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Io("client gone".into()))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: Arc<str>) -> Result<(), TransportError> {
        self.push(ServerFrame::Text(text.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(ServerFrame::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Closing an already-gone client is not an error.
        let _ = self.tx.send(ServerFrame::Close);
        Ok(())
    }
}

/// Client end of a [`MemoryTransport`].
pub struct MemoryClient {
    tx: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    rx: mpsc::UnboundedReceiver<ServerFrame>,
}

impl MemoryClient {
    /// Send a text frame. Returns `false` once disconnected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(Frame::Text(text.into()))
    }

    /// Send a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Send any frame.
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Inject a transport error into the server's read side.
    pub fn fail(&self, error: TransportError) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Drop the client's write side; the server sees end of stream.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Next frame written by the server.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.rx.recv().await
    }

    /// Next text frame parsed as JSON, skipping pings. `None` on close.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.rx.recv().await? {
                ServerFrame::Text(text) => return serde_json::from_str(&text).ok(),
                ServerFrame::Ping => {}
                ServerFrame::Close => return None,
            }
        }
    }

    /// A frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ServerFrame> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_frames_both_ways() {
        let (mut transport, mut client) = MemoryTransport::pair();
        assert!(client.send_text("hello"));
        assert_eq!(
            transport.source.recv().await,
            Some(Ok(Frame::Text("hello".into())))
        );

        transport.sink.send_text(Arc::from("world")).await.unwrap();
        transport.sink.send_ping().await.unwrap();
        assert_eq!(client.recv().await, Some(ServerFrame::Text("world".into())));
        assert_eq!(client.recv().await, Some(ServerFrame::Ping));
    }

    #[tokio::test]
    async fn disconnect_ends_source() {
        let (mut transport, mut client) = MemoryTransport::pair();
        client.disconnect();
        assert!(transport.source.recv().await.is_none());
        assert!(!client.send_text("late"));
    }

    #[tokio::test]
    async fn injected_error_is_delivered() {
        let (mut transport, client) = MemoryTransport::pair();
        assert!(client.fail(TransportError::Io("reset".into())));
        assert_eq!(
            transport.source.recv().await,
            Some(Err(TransportError::Io("reset".into())))
        );
    }

    #[tokio::test]
    async fn broken_writer_fails_writes() {
        let (mut transport, _client) = MemoryTransport::broken_writer();
        assert!(transport.sink.send_text(Arc::from("x")).await.is_err());
    }

    #[tokio::test]
    async fn recv_json_skips_pings() {
        let (mut transport, mut client) = MemoryTransport::pair();
        transport.sink.send_ping().await.unwrap();
        transport.sink.send_text(Arc::from(r#"{"x":1}"#)).await.unwrap();
        transport.sink.close().await.unwrap();
        assert_eq!(client.recv_json().await, Some(serde_json::json!({"x": 1})));
        assert_eq!(client.recv_json().await, None);
    }
}
