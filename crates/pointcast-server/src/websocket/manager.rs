//! Connection and room orchestration.
//!
//! The [`Manager`] owns the connection registry, the room registry, the
//! [`Router`], the hook engine and the middleware chain. Each accepted
//! transport is driven by [`Manager::handle_connection`] from setup through
//! the message loop to a single teardown.
//!
//! Lock order is rooms before connections. Neither registry lock is held
//! across a write, a broadcast, a hook or a handler call.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use pointcast_core::{ConnectionId, Envelope, ErrorCode, ErrorPayload, Peer};
use pointcast_hooks::{
    HookContext, HookEngine, HookError, HookHandler, HookPayload, HookType, Middleware, MiddlewareChain,
    MiddlewareError,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::connection::{Connection, ConnectionError};
use super::room::Room;
use super::router::Router;
use super::transport::Transport;
use crate::config::ManagerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_REJECTED_TOTAL, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_ROOMS_ACTIVE, WS_ROUTE_ERRORS_TOTAL,
};

/// Errors from manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager is shutting down and accepts nothing new.
    #[error("manager is shutting down")]
    ShuttingDown,
    /// Middleware refused the connection.
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
    /// A hook aborted the operation.
    #[error(transparent)]
    Hook(#[from] HookError),
    /// The room is at its member limit.
    #[error("room {room} is full ({limit} members)")]
    RoomFull {
        /// Room id.
        room: String,
        /// Configured limit.
        limit: usize,
    },
    /// No room with that id.
    #[error("room not found: {0}")]
    RoomNotFound(String),
    /// No registered connection with that id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    /// Writing to a connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ManagerError {
    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ShuttingDown => ErrorCode::ShuttingDown,
            Self::RoomFull { .. } => ErrorCode::RoomFull,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::ConnectionNotFound(_) => ErrorCode::ConnectionNotFound,
            Self::Connection(ConnectionError::Encode(_)) | Self::Middleware(_) | Self::Hook(_) | Self::Encode(_) => {
                ErrorCode::InternalError
            }
            Self::Connection(_) => ErrorCode::ConnectionClosed,
        }
    }
}

/// Owns every connection and room.
pub struct Manager {
    config: ManagerConfig,
    router: Router,
    hooks: HookEngine,
    middleware: MiddlewareChain,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    shutdown: CancellationToken,
    shutdown_once: OnceCell<()>,
    drained: Notify,
}

impl Manager {
    /// Manager with an empty router, no hooks and no middleware.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            hooks: HookEngine::default(),
            middleware: MiddlewareChain::new(),
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            shutdown_once: OnceCell::new(),
            drained: Notify::new(),
        }
    }

    /// Append a setup middleware.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the hook engine.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookEngine) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register a lifecycle hook.
    pub fn register_hook(&self, hook: Arc<dyn HookHandler>) {
        self.hooks.register(hook);
    }

    /// Action router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Hook engine.
    pub fn hooks(&self) -> &HookEngine {
        &self.hooks
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Whether [`shutdown`](Self::shutdown) has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wrap a transport in a [`Connection`] without serving it yet.
    pub fn accept(&self, transport: Transport) -> Arc<Connection> {
        Arc::new(Connection::new(transport, self.config.connection.clone()))
    }

    /// Accept and serve a transport until it closes or the manager shuts down.
    pub async fn handle_connection(self: &Arc<Self>, transport: Transport) -> Result<(), ManagerError> {
        let conn = self.accept(transport);
        self.serve(conn).await
    }

    /// Serve an accepted connection.
    ///
    /// Setup runs middleware, registration and the connect hook; a failure
    /// there closes the connection and returns the error. Once setup
    /// succeeds the message loop runs and teardown always follows.
    #[instrument(skip_all, fields(conn_id = %conn.id()))]
    pub async fn serve(self: &Arc<Self>, conn: Arc<Connection>) -> Result<(), ManagerError> {
        if self.is_shutting_down() {
            Self::reject(&conn, "shutting_down");
            return Err(ManagerError::ShuttingDown);
        }

        let peer: Arc<dyn Peer> = conn.clone();
        if let Err(e) = self.middleware.run(&peer).await {
            warn!(error = %e, "middleware refused connection");
            Self::reject(&conn, "middleware");
            return Err(e.into());
        }

        if !self.register(&conn) {
            Self::reject(&conn, "shutting_down");
            return Err(ManagerError::ShuttingDown);
        }

        let connect = HookContext::new(HookType::OnConnect, Arc::clone(&peer), HookPayload::None);
        if let Err(e) = self.hooks.execute(&connect).await {
            warn!(error = %e, "connect hook refused connection");
            let _ = self.unregister(conn.id());
            Self::reject(&conn, "hook");
            self.drained.notify_waiters();
            return Err(e.into());
        }

        let _ = conn.start();
        info!(connections = self.connection_count(), "connection established");

        if AssertUnwindSafe(self.message_loop(&conn)).catch_unwind().await.is_err() {
            error!("message loop panicked");
        }
        self.teardown(&conn).await;
        Ok(())
    }

    fn reject(conn: &Connection, reason: &'static str) {
        let _ = conn.close();
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
    }

    async fn message_loop(&self, conn: &Arc<Connection>) {
        let peer: Arc<dyn Peer> = conn.clone();
        loop {
            let read = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                read = conn.read_typed::<Envelope>() => read,
            };
            let message = match read {
                Ok(message) => message,
                Err(e) if e.is_frame_local() => {
                    debug!(error = %e, "skipping undecodable frame");
                    continue;
                }
                Err(ConnectionError::Cancelled | ConnectionError::Closed) => break,
                Err(e) => {
                    debug!(error = %e, "read failed");
                    break;
                }
            };
            if message.has_no_dispatch_key() {
                debug!("skipping frame without action or type");
                continue;
            }

            if self.hooks.has_hooks(HookType::OnMessage) {
                let ctx = HookContext::new(
                    HookType::OnMessage,
                    Arc::clone(&peer),
                    HookPayload::Message(message.clone()),
                );
                if let Err(e) = self.hooks.execute(&ctx).await {
                    debug!(action = %message.action, error = %e, "message hook skipped frame");
                    continue;
                }
            }

            if let Err(e) = self.router.route(conn, &message).await {
                let code = e.code();
                counter!(WS_ROUTE_ERRORS_TOTAL, "code" => code.as_str()).increment(1);
                debug!(action = %message.action, code = %code, error = %e, "route failed");
                self.fire(HookType::OnError, &peer, HookPayload::Error(e.to_string()))
                    .await;
                if let Err(write) = conn.write_typed(&ErrorPayload::new(code, e.to_string())) {
                    debug!(error = %write, "could not report route error");
                }
            }
        }
    }

    /// Disconnect hook, leave rooms, unregister, close and wait for the
    /// pumps to release the transport. Runs once per connection.
    async fn teardown(&self, conn: &Arc<Connection>) {
        if !conn.mark_departing() {
            return;
        }
        let peer: Arc<dyn Peer> = conn.clone();
        self.fire(HookType::OnDisconnect, &peer, HookPayload::None).await;

        for room in self.leave_all_rooms(conn) {
            self.fire(HookType::OnLeaveRoom, &peer, HookPayload::Room(room)).await;
        }
        let removed = self.unregister(conn.id());
        let _ = conn.close();
        conn.join_pumps().await;

        if removed {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        }
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
        info!(
            age = ?conn.age(),
            dropped = conn.drop_count(),
            connections = self.connection_count(),
            "connection closed"
        );
        self.drained.notify_waiters();
    }

    /// Run hooks whose failure is only logged.
    async fn fire(&self, hook_type: HookType, peer: &Arc<dyn Peer>, payload: HookPayload) {
        let ctx = HookContext::new(hook_type, Arc::clone(peer), payload);
        if let Err(e) = self.hooks.execute(&ctx).await {
            warn!(hook_type = %hook_type, error = %e, "hook failed");
        }
    }

    fn register(&self, conn: &Arc<Connection>) -> bool {
        let mut connections = self.connections.write();
        if self.is_shutting_down() {
            return false;
        }
        let _ = connections.insert(conn.id().clone(), Arc::clone(conn));
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(connections.len() as f64);
        true
    }

    fn unregister(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(id).is_some();
        gauge!(WS_CONNECTIONS_ACTIVE).set(connections.len() as f64);
        removed
    }

    fn leave_all_rooms(&self, conn: &Arc<Connection>) -> Vec<String> {
        let mut rooms = self.rooms.write();
        let mut left = Vec::new();
        for room_id in conn.subscriptions() {
            let Some(room) = rooms.get(&room_id).cloned() else {
                let _ = conn.unsubscribe(&room_id);
                continue;
            };
            if room.leave(conn.as_ref()) {
                left.push(room_id.clone());
            }
            if room.is_empty() {
                let _ = rooms.remove(&room_id);
            }
        }
        gauge!(WS_ROOMS_ACTIVE).set(rooms.len() as f64);
        left
    }

    /// Add `conn` to `room_id`, creating the room if needed.
    ///
    /// Returns `Ok(false)` if the connection was already a member. Fails with
    /// [`ManagerError::RoomFull`] when a member limit is configured and
    /// reached, and with [`ManagerError::ConnectionNotFound`] when the
    /// connection is not registered or is being torn down.
    pub async fn join_room(&self, conn: &Arc<Connection>, room_id: &str) -> Result<bool, ManagerError> {
        let peer: Arc<dyn Peer> = conn.clone();
        let joined = {
            let mut rooms = self.rooms.write();
            if conn.is_departing() || !self.connections.read().contains_key(conn.id()) {
                return Err(ManagerError::ConnectionNotFound(conn.id().to_string()));
            }
            let limit = self.config.max_connections_per_room;
            match rooms.get(room_id) {
                Some(room) if room.contains(conn.id()) => false,
                Some(room) if limit > 0 && room.size() >= limit => {
                    return Err(ManagerError::RoomFull {
                        room: room_id.to_owned(),
                        limit,
                    });
                }
                Some(room) => room.join(&peer),
                None => {
                    let room = Arc::new(Room::new(room_id));
                    let joined = room.join(&peer);
                    let _ = rooms.insert(room_id.to_owned(), room);
                    gauge!(WS_ROOMS_ACTIVE).set(rooms.len() as f64);
                    joined
                }
            }
        };
        if joined {
            self.fire(HookType::OnJoinRoom, &peer, HookPayload::Room(room_id.to_owned()))
                .await;
        }
        Ok(joined)
    }

    /// Remove `conn` from `room_id`. An emptied room is dropped from the
    /// registry. Returns `Ok(false)` if the connection was not a member.
    pub async fn leave_room(&self, conn: &Arc<Connection>, room_id: &str) -> Result<bool, ManagerError> {
        let left = {
            let mut rooms = self.rooms.write();
            let Some(room) = rooms.get(room_id).cloned() else {
                return Err(ManagerError::RoomNotFound(room_id.to_owned()));
            };
            let left = room.leave(conn.as_ref());
            if room.is_empty() {
                let _ = rooms.remove(room_id);
                gauge!(WS_ROOMS_ACTIVE).set(rooms.len() as f64);
            }
            left
        };
        if left {
            let peer: Arc<dyn Peer> = conn.clone();
            self.fire(HookType::OnLeaveRoom, &peer, HookPayload::Room(room_id.to_owned()))
                .await;
        }
        Ok(left)
    }

    /// Encode `message` once and deliver it to every member of `room_id`.
    /// Returns the number of members that accepted it.
    pub fn broadcast_to_room<T: Serialize + ?Sized>(&self, room_id: &str, message: &T) -> Result<usize, ManagerError> {
        let room = self
            .room(room_id)
            .ok_or_else(|| ManagerError::RoomNotFound(room_id.to_owned()))?;
        room.broadcast(message).map_err(ManagerError::Encode)
    }

    /// Encode `message` once and deliver it to every registered connection.
    pub fn broadcast_to_all<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, ManagerError> {
        let text: Arc<str> = Arc::from(serde_json::to_string(message).map_err(ManagerError::Encode)?);
        let targets: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        Ok(targets
            .iter()
            .filter(|conn| conn.write_text(Arc::clone(&text)).is_ok())
            .count())
    }

    /// Send `message` to one connection.
    pub fn send_to_connection<T: Serialize + ?Sized>(&self, id: &ConnectionId, message: &T) -> Result<(), ManagerError> {
        let conn = self
            .connection(id)
            .ok_or_else(|| ManagerError::ConnectionNotFound(id.to_string()))?;
        conn.write_typed(message)?;
        Ok(())
    }

    /// Room by id, creating an empty one if absent.
    pub fn get_or_create_room(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| Arc::new(Room::new(room_id)));
        Arc::clone(room)
    }

    /// Room by id.
    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(room_id).cloned()
    }

    /// Registered connection by id.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Stop accepting connections, close every tracked connection, and wait
    /// up to the configured timeout for teardown to finish.
    ///
    /// Runs once; concurrent and later callers wait for the first run.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_once.get_or_init(|| self.run_shutdown()).await;
    }

    async fn run_shutdown(&self) {
        let timeout = self.config.shutdown_timeout;
        info!(connections = self.connection_count(), ?timeout, "manager shutting down");
        self.shutdown.cancel();

        let open: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        for conn in &open {
            let _ = conn.close();
        }

        if tokio::time::timeout(timeout, self.wait_drained()).await.is_err() {
            let mut connections = self.connections.write();
            warn!(remaining = connections.len(), ?timeout, "shutdown timed out, dropping remaining connections");
            connections.clear();
            gauge!(WS_CONNECTIONS_ACTIVE).set(0.0);
        }
        self.rooms.write().clear();
        gauge!(WS_ROOMS_ACTIVE).set(0.0);
        info!("manager shut down");
    }

    async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.connection_count() == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Configured shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        self.config.shutdown_timeout
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("connections", &self.connection_count())
            .field("rooms", &self.room_count())
            .field("router", &self.router)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
