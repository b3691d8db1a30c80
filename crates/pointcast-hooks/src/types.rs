//! Hook types and the context passed to handlers.

use std::fmt;
use std::sync::Arc;

use pointcast_core::{Envelope, Peer};
use serde::{Deserialize, Serialize};

/// Lifecycle events a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    /// Connection registered, before its message loop starts.
    OnConnect,
    /// Connection is being torn down.
    OnDisconnect,
    /// Inbound frame decoded, before routing.
    OnMessage,
    /// A frame failed routing.
    OnError,
    /// Connection joined a room.
    OnJoinRoom,
    /// Connection left a room.
    OnLeaveRoom,
}

impl HookType {
    /// Returns all hook type variants.
    #[must_use]
    pub fn all() -> &'static [HookType] {
        &[
            Self::OnConnect,
            Self::OnDisconnect,
            Self::OnMessage,
            Self::OnError,
            Self::OnJoinRoom,
            Self::OnLeaveRoom,
        ]
    }

    /// Snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnConnect => "on_connect",
            Self::OnDisconnect => "on_disconnect",
            Self::OnMessage => "on_message",
            Self::OnError => "on_error",
            Self::OnJoinRoom => "on_join_room",
            Self::OnLeaveRoom => "on_leave_room",
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-specific data.
#[derive(Debug, Clone)]
pub enum HookPayload {
    /// Nothing beyond the connection.
    None,
    /// The decoded inbound frame.
    Message(Envelope),
    /// Room id for join/leave.
    Room(String),
    /// Error description for `OnError`.
    Error(String),
}

/// What a hook handler sees.
#[derive(Clone)]
pub struct HookContext {
    /// Event.
    pub hook_type: HookType,
    /// Connection the event concerns.
    pub peer: Arc<dyn Peer>,
    /// Event data.
    pub payload: HookPayload,
}

impl HookContext {
    /// Build a context.
    pub fn new(hook_type: HookType, peer: Arc<dyn Peer>, payload: HookPayload) -> Self {
        Self {
            hook_type,
            peer,
            payload,
        }
    }

    /// Room id, for join/leave events.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        match &self.payload {
            HookPayload::Room(room) => Some(room),
            _ => None,
        }
    }

    /// Inbound frame, for message events.
    #[must_use]
    pub fn message(&self) -> Option<&Envelope> {
        match &self.payload {
            HookPayload::Message(envelope) => Some(envelope),
            _ => None,
        }
    }
}

impl fmt::Debug for HookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("hook_type", &self.hook_type)
            .field("peer", self.peer.id())
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde() {
        for ty in HookType::all() {
            let json = serde_json::to_value(ty).unwrap();
            assert_eq!(json, ty.to_string());
        }
    }

    #[test]
    fn all_is_complete() {
        assert_eq!(HookType::all().len(), 6);
    }
}
