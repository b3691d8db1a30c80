//! One accepted connection.
//!
//! A [`Connection`] owns its [`Transport`] and decouples it from
//! application code with two pumps:
//!
//! - the **inbound pump** moves text frames into a bounded inbox and records
//!   the first transport error;
//! - the **outbound pump** drains a bounded outbox to the socket, pings the
//!   peer on an interval, and gives up on the first failed write.
//!
//! Both pumps and every session bound to the connection observe one
//! [`CancellationToken`]. Cancelling it is how a connection goes away.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use pointcast_core::{ConnectionId, Peer, PeerError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::{Frame, FrameSink, FrameSource, Transport, TransportError};
use crate::config::ConnectionConfig;
use crate::metrics::WS_MESSAGES_DROPPED_TOTAL;

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting reads and writes.
    Open,
    /// `close` is in progress.
    Closing,
    /// Closed; writes fail.
    Closed,
}

/// Errors from connection reads and writes.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was cancelled while waiting.
    #[error("connection cancelled")]
    Cancelled,
    /// The peer went away without a transport error.
    #[error("connection closed by peer")]
    Closed,
    /// Write attempted after `close`.
    #[error("connection already closed")]
    AlreadyClosed,
    /// The inbound pump hit a transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ConnectionError {
    /// Whether the connection can keep reading after this error.
    #[must_use]
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

struct Pumps {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    inbox_tx: mpsc::Sender<String>,
    outbox_rx: mpsc::Receiver<Arc<str>>,
}

/// A connected client.
pub struct Connection {
    id: ConnectionId,
    state: AtomicU8,
    departing: AtomicBool,
    connected_at: Instant,
    cancel: CancellationToken,
    metadata: RwLock<HashMap<String, Value>>,
    rooms: RwLock<BTreeSet<String>>,
    outbox: mpsc::Sender<Arc<str>>,
    inbox: tokio::sync::Mutex<mpsc::Receiver<String>>,
    error: Mutex<Option<TransportError>>,
    pumps: Mutex<Option<Pumps>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    config: ConnectionConfig,
}

impl Connection {
    /// Wrap a transport. Nothing is read or written until [`start`](Self::start).
    pub fn new(transport: Transport, config: ConnectionConfig) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbox_capacity.max(1));
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(OPEN),
            departing: AtomicBool::new(false),
            connected_at: now,
            cancel: CancellationToken::new(),
            metadata: RwLock::new(HashMap::new()),
            rooms: RwLock::new(BTreeSet::new()),
            outbox: outbox_tx,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            error: Mutex::new(None),
            pumps: Mutex::new(Some(Pumps {
                source: transport.source,
                sink: transport.sink,
                inbox_tx,
                outbox_rx,
            })),
            tasks: Mutex::new(Vec::new()),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            config,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Token cancelled when this connection goes away.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the connection has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Outbound frames dropped because the outbox was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the last inbound frame of any kind.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Launch the inbound and outbound pumps. Returns `false` if they were
    /// already started or the connection is closed.
    pub fn start(self: &Arc<Self>) -> bool {
        let Some(pumps) = self.pumps.lock().take() else {
            return false;
        };
        let Pumps {
            source,
            sink,
            inbox_tx,
            outbox_rx,
        } = pumps;

        let inbound = tokio::spawn(Arc::clone(self).inbound_pump(source, inbox_tx));
        let outbound = tokio::spawn(Arc::clone(self).outbound_pump(sink, outbox_rx));
        self.tasks.lock().extend([inbound, outbound]);
        true
    }

    async fn inbound_pump(self: Arc<Self>, mut source: Box<dyn FrameSource>, inbox: mpsc::Sender<String>) {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => break,
                frame = source.recv() => frame,
            };
            let text = match frame {
                Some(Ok(Frame::Text(text))) => text,
                Some(Ok(Frame::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(conn_id = %self.id, len = e.as_bytes().len(), "ignoring non-UTF8 binary frame");
                        self.mark_seen();
                        continue;
                    }
                },
                Some(Ok(Frame::Ping | Frame::Pong)) => {
                    self.mark_seen();
                    continue;
                }
                Some(Ok(Frame::Close)) | None => {
                    debug!(conn_id = %self.id, "peer closed");
                    break;
                }
                Some(Err(error)) => {
                    self.signal_error(error);
                    break;
                }
            };
            self.mark_seen();
            // Block on a full inbox, but never past cancellation.
            tokio::select! {
                () = self.cancel.cancelled() => break,
                sent = inbox.send(text) => if sent.is_err() { break },
            }
        }
    }

    async fn outbound_pump(self: Arc<Self>, mut sink: Box<dyn FrameSink>, mut outbox: mpsc::Receiver<Arc<str>>) {
        // A zero period would panic inside `interval_at`.
        let ping_interval = self.config.ping_interval.max(Duration::from_millis(1));
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let silence_limit = ping_interval + self.config.pong_timeout;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                message = outbox.recv() => {
                    let Some(text) = message else { break };
                    if let Err(error) = sink.send_text(text).await {
                        warn!(conn_id = %self.id, error = %error, "write failed, dropping connection");
                        self.signal_error(error);
                        break;
                    }
                }
                _ = ping.tick() => {
                    if self.idle_for() > silence_limit {
                        warn!(conn_id = %self.id, idle = ?self.idle_for(), "peer unresponsive, dropping connection");
                        self.signal_error(TransportError::Unresponsive(silence_limit));
                        break;
                    }
                    if let Err(error) = sink.send_ping().await {
                        self.signal_error(error);
                        break;
                    }
                }
            }
        }
        outbox.close();
        let _ = sink.close().await;
    }

    /// Record the first transport error and cancel. Later errors are ignored.
    fn signal_error(&self, error: TransportError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.cancel.cancel();
    }

    /// Wait for the next inbound text frame.
    ///
    /// Fails with [`ConnectionError::Cancelled`] once cancelled, with the
    /// recorded transport error once (then [`ConnectionError::Closed`]) when
    /// the inbound pump stopped on one, or [`ConnectionError::Closed`] when
    /// the peer went away.
    pub async fn read_text(&self) -> Result<String, ConnectionError> {
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.take_error().map_or(ConnectionError::Cancelled, ConnectionError::Transport)),
            frame = inbox.recv() => match frame {
                Some(text) => Ok(text),
                None => Err(self.take_error().map_or(ConnectionError::Closed, ConnectionError::Transport)),
            },
        }
    }

    /// Wait for the next inbound frame and decode it as JSON.
    pub async fn read_typed<T: DeserializeOwned>(&self) -> Result<T, ConnectionError> {
        let text = self.read_text().await?;
        serde_json::from_str(&text).map_err(ConnectionError::Decode)
    }

    fn take_error(&self) -> Option<TransportError> {
        self.error.lock().take()
    }

    /// Queue an encoded frame without waiting.
    ///
    /// A full outbox drops the frame, counts it and returns `Ok`.
    pub fn write_text(&self, text: Arc<str>) -> Result<(), ConnectionError> {
        if self.state.load(Ordering::SeqCst) != OPEN {
            return Err(ConnectionError::AlreadyClosed);
        }
        match self.outbox.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(WS_MESSAGES_DROPPED_TOTAL).increment(1);
                warn!(conn_id = %self.id, dropped, "outbox full, dropping message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectionError::AlreadyClosed),
        }
    }

    /// Encode `value` as JSON and queue it without waiting.
    pub fn write_typed<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(value).map_err(ConnectionError::Encode)?;
        self.write_text(Arc::from(text))
    }

    /// Close the connection. Safe to call repeatedly and concurrently; only
    /// the first call does anything and returns `true`.
    pub fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel.cancel();
        // Pumps that never started still hold the transport.
        drop(self.pumps.lock().take());
        self.state.store(CLOSED, Ordering::SeqCst);
        debug!(conn_id = %self.id, age = ?self.age(), "connection closed");
        true
    }

    /// Wait for both pumps to finish. Call after [`close`](Self::close).
    pub async fn join_pumps(&self) {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let _ = futures::future::join_all(tasks).await;
    }

    /// Flag the connection as being torn down. Returns `true` for the first
    /// caller only.
    pub(crate) fn mark_departing(&self) -> bool {
        !self.departing.swap(true, Ordering::SeqCst)
    }

    /// Whether teardown has begun.
    pub fn is_departing(&self) -> bool {
        self.departing.load(Ordering::SeqCst)
    }
}

impl Peer for Connection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_text(&self, text: Arc<str>) -> Result<(), PeerError> {
        self.write_text(text).map_err(|_| PeerError::Closed)
    }

    fn set_metadata(&self, key: &str, value: Value) {
        let _ = self.metadata.write().insert(key.to_owned(), value);
    }

    fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }

    fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.write().remove(key)
    }

    fn subscribe(&self, room: &str) -> bool {
        self.rooms.write().insert(room.to_owned())
    }

    fn unsubscribe(&self, room: &str) -> bool {
        self.rooms.write().remove(room)
    }

    fn is_subscribed(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }

    fn subscriptions(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != OPEN
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("rooms", &*self.rooms.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::transport::{MemoryClient, MemoryTransport, ServerFrame};
    use assert_matches::assert_matches;

    fn make_connection() -> (Arc<Connection>, MemoryClient) {
        let (transport, client) = MemoryTransport::pair();
        (Arc::new(Connection::new(transport, ConnectionConfig::default())), client)
    }

    #[test]
    fn create_connection() {
        let (conn, _client) = make_connection();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(!conn.is_closed());
        assert!(conn.subscriptions().is_empty());
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn reads_text_frames_in_order() {
        let (conn, client) = make_connection();
        assert!(conn.start());
        assert!(client.send_text("one"));
        assert!(client.send_text("two"));
        assert_eq!(conn.read_text().await.unwrap(), "one");
        assert_eq!(conn.read_text().await.unwrap(), "two");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ping_interval_does_not_kill_the_pump() {
        let (transport, mut client) = MemoryTransport::pair();
        let config = ConnectionConfig {
            ping_interval: Duration::ZERO,
            pong_timeout: Duration::from_secs(10),
            ..ConnectionConfig::default()
        };
        let conn = Arc::new(Connection::new(transport, config));
        assert!(conn.start());
        conn.write_typed(&"hello").unwrap();
        assert_eq!(client.recv_json().await, Some(serde_json::json!("hello")));
        assert!(!conn.is_cancelled());
    }

    #[tokio::test]
    async fn start_is_one_shot() {
        let (conn, _client) = make_connection();
        assert!(conn.start());
        assert!(!conn.start());
    }

    #[tokio::test]
    async fn binary_utf8_is_read_as_text() {
        let (conn, client) = make_connection();
        let _ = conn.start();
        assert!(client.send_frame(Frame::Binary(vec![0xff, 0xfe])));
        assert!(client.send_frame(Frame::Binary(b"{\"a\":1}".to_vec())));
        let value: Value = conn.read_typed().await.unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn read_typed_reports_decode_error() {
        let (conn, client) = make_connection();
        let _ = conn.start();
        assert!(client.send_text("not json"));
        let err = conn.read_typed::<Value>().await.unwrap_err();
        assert!(err.is_frame_local());
    }

    #[tokio::test]
    async fn peer_disconnect_reads_closed() {
        let (conn, mut client) = make_connection();
        let _ = conn.start();
        client.disconnect();
        assert_matches!(conn.read_text().await, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn transport_error_is_signalled_once() {
        let (conn, client) = make_connection();
        let _ = conn.start();
        assert!(client.fail(TransportError::Io("reset".into())));
        assert_matches!(
            conn.read_text().await,
            Err(ConnectionError::Transport(TransportError::Io(_)))
        );
        assert_matches!(conn.read_text().await, Err(ConnectionError::Cancelled));
        assert!(conn.is_cancelled());
    }

    #[tokio::test]
    async fn read_returns_cancelled_after_close() {
        let (conn, _client) = make_connection();
        let _ = conn.start();
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.read_text().await })
        };
        tokio::task::yield_now().await;
        assert!(conn.close());
        assert_matches!(reader.await.unwrap(), Err(ConnectionError::Cancelled));
    }

    #[tokio::test]
    async fn writes_reach_client() {
        let (conn, mut client) = make_connection();
        let _ = conn.start();
        conn.write_typed(&serde_json::json!({"x": 10, "y": 20})).unwrap();
        assert_eq!(client.recv_json().await, Some(serde_json::json!({"x": 10, "y": 20})));
    }

    #[test]
    fn full_outbox_drops_without_blocking() {
        let (transport, _client) = MemoryTransport::pair();
        let config = ConnectionConfig {
            outbox_capacity: 2,
            ..ConnectionConfig::default()
        };
        // Not started, so nothing drains the outbox.
        let conn = Connection::new(transport, config);
        for i in 0..5 {
            conn.write_typed(&i).unwrap();
        }
        assert_eq!(conn.drop_count(), 3);
    }

    #[test]
    fn write_after_close_fails() {
        let (conn, _client) = make_connection();
        assert!(conn.close());
        assert_matches!(conn.write_typed(&1), Err(ConnectionError::AlreadyClosed));
        let peer: Arc<dyn Peer> = conn;
        assert_matches!(peer.send_json(&1), Err(PeerError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (conn, mut client) = make_connection();
        let _ = conn.start();
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.close() })
            })
            .collect();
        let mut wins = 0;
        for closer in closers {
            if closer.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.is_cancelled());
        conn.join_pumps().await;
        assert_eq!(client.recv().await, Some(ServerFrame::Close));
    }

    #[tokio::test]
    async fn write_failure_cancels_connection() {
        let (transport, _client) = MemoryTransport::broken_writer();
        let conn = Arc::new(Connection::new(transport, ConnectionConfig::default()));
        let _ = conn.start();
        conn.write_typed(&"hello").unwrap();
        conn.cancellation().cancelled().await;
        assert_matches!(
            conn.read_text().await,
            Err(ConnectionError::Transport(TransportError::Io(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval() {
        let (conn, mut client) = make_connection();
        let _ = conn.start();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(client.recv().await, Some(ServerFrame::Ping));
        assert!(!conn.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_dropped() {
        let (conn, _client) = make_connection();
        let _ = conn.start();
        // First tick at 60s pings; second at 120s finds 120s > 70s of silence.
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(conn.is_cancelled());
        assert_matches!(
            conn.read_text().await,
            Err(ConnectionError::Transport(TransportError::Unresponsive(_)))
        );
    }

    #[test]
    fn metadata_and_subscriptions() {
        let (conn, _client) = make_connection();
        conn.set_metadata("point_id", serde_json::json!(3));
        assert_eq!(conn.metadata("point_id"), Some(serde_json::json!(3)));
        assert_eq!(conn.remove_metadata("point_id"), Some(serde_json::json!(3)));
        assert!(conn.metadata("point_id").is_none());

        assert!(conn.subscribe("point_2"));
        assert!(conn.subscribe("point_1"));
        assert!(!conn.subscribe("point_1"));
        assert_eq!(conn.subscriptions(), vec!["point_1", "point_2"]);
        assert!(conn.unsubscribe("point_2"));
        assert!(!conn.is_subscribed("point_2"));
    }

    #[test]
    fn departing_is_one_shot() {
        let (conn, _client) = make_connection();
        assert!(conn.mark_departing());
        assert!(!conn.mark_departing());
        assert!(conn.is_departing());
    }
}
