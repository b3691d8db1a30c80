//! `move` and `subscribe` actions.
//!
//! Each connection gets one session per point it drives. The session's
//! position updates are fanned out to the point's room, so every client
//! following a point sees every other client's moves.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use pointcast_core::constants::POINT_ID_METADATA_KEY;
use pointcast_core::{ConnectionId, Envelope, MoveCommand, Peer, PointId, PointRepository, SubscribeCommand};
use serde_json::Value;
use tracing::{debug, info};

use super::session::{SessionHandle, spawn_session};
use crate::config::SessionConfig;
use crate::websocket::{Connection, HandlerError, Manager, ManagerError, MessageHandler};

type SessionKey = (ConnectionId, PointId);

/// Point actions bound to one [`Manager`].
pub struct PointHandler {
    manager: Weak<Manager>,
    repo: Arc<dyn PointRepository>,
    config: SessionConfig,
    default_point: PointId,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
}

impl PointHandler {
    /// Create the handler and register its actions on `manager`'s router.
    pub fn install(
        manager: &Arc<Manager>,
        repo: Arc<dyn PointRepository>,
        config: SessionConfig,
        default_point: PointId,
    ) -> Arc<Self> {
        let handler = Arc::new(Self {
            manager: Arc::downgrade(manager),
            repo,
            config,
            default_point,
            sessions: Mutex::new(HashMap::new()),
        });
        manager
            .router()
            .handle("move", Arc::new(MoveAction(Arc::clone(&handler))));
        manager
            .router()
            .handle("subscribe", Arc::new(SubscribeAction(Arc::clone(&handler))));
        info!(default_point = %default_point, "point actions installed");
        handler
    }

    fn manager(&self) -> Result<Arc<Manager>, HandlerError> {
        self.manager
            .upgrade()
            .ok_or_else(|| HandlerError::Unavailable("manager dropped".into()))
    }

    /// Point the connection is bound to, falling back to the default.
    pub fn point_for(&self, conn: &Connection) -> PointId {
        conn.metadata(POINT_ID_METADATA_KEY)
            .and_then(|value| value.as_i64())
            .and_then(|raw| PointId::new(raw).ok())
            .unwrap_or(self.default_point)
    }

    /// Live sessions across all connections.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// The connection's session for `point_id`, started on first use.
    ///
    /// Starting a session joins the point's room and spawns a forwarder
    /// that broadcasts each position update to that room.
    pub async fn session_for(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        point_id: PointId,
    ) -> Result<SessionHandle, HandlerError> {
        let key = (conn.id().clone(), point_id);
        if let Some(handle) = self.sessions.lock().get(&key).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }

        let manager = self.manager()?;
        let room = point_id.room_id();
        let _ = manager.join_room(conn, &room).await?;

        let cancel = conn.cancellation().child_token();
        let (handle, mut positions, worker) = spawn_session(Arc::clone(&self.repo), point_id, self.config, cancel);
        let _ = self.sessions.lock().insert(key.clone(), handle.clone());
        debug!(conn_id = %conn.id(), point_id = %point_id, "session created");

        let this = Arc::downgrade(self);
        let weak_manager = Arc::downgrade(&manager);
        let conn = Arc::clone(conn);
        let own = handle.clone();
        drop(tokio::spawn(async move {
            while let Some(position) = positions.recv().await {
                let Some(manager) = weak_manager.upgrade() else { break };
                match manager.broadcast_to_room(&room, &position) {
                    Ok(_) => {}
                    Err(ManagerError::RoomNotFound(_)) => {
                        let _ = conn.write_typed(&position);
                    }
                    Err(error) => debug!(room = %room, error = %error, "position broadcast failed"),
                }
            }
            let _ = worker.await;
            if let Some(handler) = this.upgrade() {
                handler.forget(&key, &own);
            }
        }));
        Ok(handle)
    }

    fn forget(&self, key: &SessionKey, handle: &SessionHandle) {
        let mut sessions = self.sessions.lock();
        if sessions.get(key).is_some_and(|current| current.same_session(handle)) {
            let _ = sessions.remove(key);
        }
    }

    async fn on_move(self: &Arc<Self>, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError> {
        let mut command: MoveCommand = message.payload()?;
        if command.is_noop() {
            if let Ok(top) = message.top_level::<MoveCommand>() {
                command = top;
            }
        }
        if command.is_noop() {
            return Ok(());
        }
        let point_id = self.point_for(conn);
        let session = self.session_for(conn, point_id).await?;
        if !session.push(command) {
            debug!(conn_id = %conn.id(), point_id = %point_id, "move not queued");
        }
        Ok(())
    }

    async fn on_subscribe(self: &Arc<Self>, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError> {
        let SubscribeCommand { id } = message.payload()?;
        let previous = self.point_for(conn);
        // Join the new room first so a refused join leaves the old binding intact.
        let _ = self.session_for(conn, id).await?;
        if previous != id {
            self.release(conn, previous).await;
        }
        conn.set_metadata(POINT_ID_METADATA_KEY, Value::from(id.get()));

        let point = self.repo.get(id).await?;
        conn.write_typed(&point.position())?;
        debug!(conn_id = %conn.id(), point_id = %id, "subscribed");
        Ok(())
    }

    /// Stop the connection's session for `point_id` and leave its room.
    async fn release(&self, conn: &Arc<Connection>, point_id: PointId) {
        let removed = self.sessions.lock().remove(&(conn.id().clone(), point_id));
        let Some(handle) = removed else { return };
        handle.stop();
        if let Ok(manager) = self.manager() {
            let _ = manager.leave_room(conn, &point_id.room_id()).await;
        }
    }

    /// Read `point_id` and send its position to everyone in its room.
    pub async fn broadcast_position(&self, point_id: PointId) -> Result<usize, HandlerError> {
        let point = self.repo.get(point_id).await?;
        let delivered = self
            .manager()?
            .broadcast_to_room(&point_id.room_id(), &point.position())?;
        Ok(delivered)
    }
}

impl std::fmt::Debug for PointHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointHandler")
            .field("default_point", &self.default_point)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

struct MoveAction(Arc<PointHandler>);

#[async_trait]
impl MessageHandler for MoveAction {
    async fn handle(&self, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError> {
        self.0.on_move(conn, message).await
    }
}

struct SubscribeAction(Arc<PointHandler>);

#[async_trait]
impl MessageHandler for SubscribeAction {
    async fn handle(&self, conn: &Arc<Connection>, message: &Envelope) -> Result<(), HandlerError> {
        self.0.on_subscribe(conn, message).await
    }
}
