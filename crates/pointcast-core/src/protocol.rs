//! Wire types.
//!
//! Inbound frames are [`Envelope`]s: `{"action": .., "type": .., "data": ..}`.
//! `action` is the dispatch key and `type` the fallback. Fields other than
//! these three are kept in [`Envelope::extra`] so handlers can accept
//! payloads written at the top level.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ErrorCode;
use crate::ids::PointId;
use crate::point::Position;

/// One inbound message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Primary dispatch key.
    #[serde(default)]
    pub action: String,
    /// Fallback dispatch key.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Handler-specific payload, left undecoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Envelope with an action and payload.
    #[must_use]
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// The `type` tag, if non-empty.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref().filter(|k| !k.is_empty())
    }

    /// Whether neither dispatch key is set.
    #[must_use]
    pub fn has_no_dispatch_key(&self) -> bool {
        self.action.is_empty() && self.kind().is_none()
    }

    /// Decode the payload. Reads `data` when present, otherwise the extra
    /// top-level fields.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(data) if !data.is_null() => T::deserialize(data),
            _ => T::deserialize(Value::Object(self.extra.clone())),
        }
    }

    /// Decode the extra top-level fields, ignoring `data`.
    pub fn top_level<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.extra.clone()))
    }
}

/// Payload of a `move` action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCommand {
    /// X delta.
    #[serde(default)]
    pub dx: i32,
    /// Y delta.
    #[serde(default)]
    pub dy: i32,
}

impl MoveCommand {
    /// A command with no effect.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

/// Payload of a `subscribe` action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeCommand {
    /// Point to follow and control.
    pub id: PointId,
}

/// Error reply sent to the client that caused it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable code.
    pub code: ErrorCode,
}

impl ErrorPayload {
    /// Build a payload.
    #[must_use]
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Answer to a point query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointResponse {
    /// Point id.
    pub id: PointId,
    /// Current coordinates.
    pub point: Position,
}
