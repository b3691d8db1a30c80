//! In-memory [`Peer`] for tests in this and downstream crates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::PeerError;
use crate::ids::ConnectionId;
use crate::peer::Peer;

/// Peer that records every frame it is sent.
#[derive(Default)]
pub struct RecordingPeer {
    id: ConnectionId,
    sent: Mutex<Vec<Arc<str>>>,
    metadata: Mutex<HashMap<String, Value>>,
    rooms: Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

impl RecordingPeer {
    /// New open peer with a fresh id.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().iter().map(ToString::to_string).collect()
    }

    /// Frames sent so far, parsed as JSON.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Make further sends fail with [`PeerError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Peer for RecordingPeer {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_text(&self, text: Arc<str>) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn set_metadata(&self, key: &str, value: Value) {
        let _ = self.metadata.lock().insert(key.to_owned(), value);
    }

    fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().remove(key)
    }

    fn subscribe(&self, room: &str) -> bool {
        self.rooms.lock().insert(room.to_owned())
    }

    fn unsubscribe(&self, room: &str) -> bool {
        self.rooms.lock().remove(room)
    }

    fn is_subscribed(&self, room: &str) -> bool {
        self.rooms.lock().contains(room)
    }

    fn subscriptions(&self) -> Vec<String> {
        self.rooms.lock().iter().cloned().collect()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
