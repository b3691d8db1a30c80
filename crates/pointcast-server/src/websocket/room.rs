//! Broadcast groups.
//!
//! A [`Room`] tracks its members as [`Peer`]s. Every broadcast snapshots
//! the member list under the read lock and delivers after releasing it, so
//! a slow member never holds up joins, leaves or other broadcasts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pointcast_core::{ConnectionId, Peer};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A named set of connections.
pub struct Room {
    id: String,
    members: RwLock<HashMap<ConnectionId, Arc<dyn Peer>>>,
    metadata: RwLock<HashMap<String, Value>>,
}

impl Room {
    /// Empty room.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member and record the room on the peer. Returns `false` if
    /// the peer was already a member.
    pub fn join(&self, peer: &Arc<dyn Peer>) -> bool {
        {
            let mut members = self.members.write();
            if members.contains_key(peer.id()) {
                return false;
            }
            let _ = members.insert(peer.id().clone(), Arc::clone(peer));
        }
        let _ = peer.subscribe(&self.id);
        debug!(room = %self.id, conn_id = %peer.id(), subscriptions = ?peer.subscriptions(), "joined room");
        true
    }

    /// Remove a member and forget the room on the peer. Returns `false` if
    /// the peer was not a member.
    pub fn leave(&self, peer: &dyn Peer) -> bool {
        if self.members.write().remove(peer.id()).is_none() {
            return false;
        }
        let _ = peer.unsubscribe(&self.id);
        debug!(room = %self.id, conn_id = %peer.id(), subscriptions = ?peer.subscriptions(), "left room");
        true
    }

    /// Encode once and deliver to every member. Returns the number of
    /// members that accepted the frame.
    pub fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> Result<usize, serde_json::Error> {
        let text: Arc<str> = Arc::from(serde_json::to_string(message)?);
        Ok(self.deliver(&text, None))
    }

    /// Like [`broadcast`](Self::broadcast) but skips `exclude`.
    pub fn broadcast_excluding<T: Serialize + ?Sized>(
        &self,
        message: &T,
        exclude: &ConnectionId,
    ) -> Result<usize, serde_json::Error> {
        let text: Arc<str> = Arc::from(serde_json::to_string(message)?);
        Ok(self.deliver(&text, Some(exclude)))
    }

    fn deliver(&self, text: &Arc<str>, exclude: Option<&ConnectionId>) -> usize {
        let mut delivered = 0;
        for peer in self.members() {
            if exclude == Some(peer.id()) {
                continue;
            }
            match peer.send_text(Arc::clone(text)) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    debug!(room = %self.id, conn_id = %peer.id(), error = %error, "broadcast delivery failed");
                }
            }
        }
        delivered
    }

    /// Point-in-time member count.
    pub fn size(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the room has no members.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.read().contains_key(id)
    }

    /// Snapshot of the members.
    pub fn members(&self) -> Vec<Arc<dyn Peer>> {
        self.members.read().values().cloned().collect()
    }

    /// Store a metadata value.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        let _ = self.metadata.write().insert(key.into(), value);
    }

    /// Read a metadata value.
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().get(key).cloned()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointcast_core::testing::RecordingPeer;
    use serde_json::json;

    fn peer() -> (Arc<RecordingPeer>, Arc<dyn Peer>) {
        let recorder = RecordingPeer::new();
        let peer: Arc<dyn Peer> = recorder.clone();
        (recorder, peer)
    }

    #[test]
    fn join_is_idempotent() {
        let room = Room::new("point_1");
        let (recorder, p) = peer();
        assert!(room.join(&p));
        assert!(!room.join(&p));
        assert_eq!(room.size(), 1);
        assert!(recorder.is_subscribed("point_1"));
    }

    #[test]
    fn leave_mirrors_join() {
        let room = Room::new("point_1");
        let (recorder, p) = peer();
        assert!(!room.leave(p.as_ref()));
        assert!(room.join(&p));
        assert!(room.leave(p.as_ref()));
        assert!(!room.leave(p.as_ref()));
        assert!(room.is_empty());
        assert!(recorder.subscriptions().is_empty());
    }

    #[test]
    fn broadcast_reaches_every_member() {
        let room = Room::new("point_1");
        let (a, pa) = peer();
        let (b, pb) = peer();
        let _ = room.join(&pa);
        let _ = room.join(&pb);
        assert_eq!(room.broadcast(&json!({"x": 10, "y": 20})).unwrap(), 2);
        assert_eq!(a.sent_json(), vec![json!({"x": 10, "y": 20})]);
        assert_eq!(b.sent_json(), vec![json!({"x": 10, "y": 20})]);
    }

    #[test]
    fn failed_member_does_not_stop_delivery() {
        let room = Room::new("lobby");
        let (dead, pdead) = peer();
        let (live, plive) = peer();
        let _ = room.join(&pdead);
        let _ = room.join(&plive);
        dead.close();
        assert_eq!(room.broadcast(&json!("hi")).unwrap(), 1);
        assert_eq!(live.sent(), vec!["\"hi\"".to_string()]);
        assert_eq!(room.size(), 2);
    }

    #[test]
    fn broadcast_excluding_skips_sender() {
        let room = Room::new("lobby");
        let (a, pa) = peer();
        let (b, pb) = peer();
        let _ = room.join(&pa);
        let _ = room.join(&pb);
        assert_eq!(room.broadcast_excluding(&json!(1), pa.id()).unwrap(), 1);
        assert!(a.sent().is_empty());
        assert_eq!(b.sent(), vec!["1".to_string()]);
    }

    #[test]
    fn metadata_is_independent_of_members() {
        let room = Room::new("lobby");
        room.set_metadata("topic", json!("points"));
        assert_eq!(room.metadata("topic"), Some(json!("points")));
        assert!(room.is_empty());
    }

    #[test]
    fn contains_and_members() {
        let room = Room::new("lobby");
        let (_a, pa) = peer();
        let _ = room.join(&pa);
        assert!(room.contains(pa.id()));
        assert_eq!(room.members().len(), 1);
        assert_eq!(room.id(), "lobby");
    }
}
