//! Narrow view of a connection.
//!
//! Rooms, hooks and handlers hold `Arc<dyn Peer>` rather than the concrete
//! connection type, so they never see the transport.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::errors::PeerError;
use crate::ids::ConnectionId;

/// Capabilities a connection exposes to the rest of the system.
///
/// Every method is non-blocking and safe to call from any task.
pub trait Peer: Send + Sync {
    /// Connection id.
    fn id(&self) -> &ConnectionId;

    /// Queue an already-encoded frame. Returns [`PeerError::Closed`] once the
    /// peer is closed. A full outbound queue drops the frame and still
    /// returns `Ok`.
    fn send_text(&self, text: Arc<str>) -> Result<(), PeerError>;

    /// Store a metadata value, replacing any previous one.
    fn set_metadata(&self, key: &str, value: Value);

    /// Read a metadata value.
    fn metadata(&self, key: &str) -> Option<Value>;

    /// Remove a metadata value.
    fn remove_metadata(&self, key: &str) -> Option<Value>;

    /// Record membership in a room. Returns `false` if already recorded.
    fn subscribe(&self, room: &str) -> bool;

    /// Forget membership in a room. Returns `false` if not recorded.
    fn unsubscribe(&self, room: &str) -> bool;

    /// Whether membership in `room` is recorded.
    fn is_subscribed(&self, room: &str) -> bool;

    /// Snapshot of recorded rooms.
    fn subscriptions(&self) -> Vec<String>;

    /// Whether the peer has been closed.
    fn is_closed(&self) -> bool;
}

impl dyn Peer {
    /// Serialize `value` and queue it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), PeerError> {
        let text = serde_json::to_string(value)?;
        self.send_text(Arc::from(text))
    }
}
