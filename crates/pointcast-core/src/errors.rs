//! Error types shared across crates.
//!
//! - [`RepositoryError`]: failures reading or writing a point
//! - [`PeerError`]: failures delivering to a connection
//! - [`ErrorCode`]: machine-readable codes sent to clients

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes reported on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No handler is registered for the frame's action or type.
    UnknownAction,
    /// Room reached its member limit.
    RoomFull,
    /// Room does not exist.
    RoomNotFound,
    /// Connection does not exist.
    ConnectionNotFound,
    /// Payload could not be decoded.
    InvalidPayload,
    /// Identifier out of range.
    InvalidId,
    /// Connection already closed.
    ConnectionClosed,
    /// Manager is shutting down.
    ShuttingDown,
    /// Anything else.
    InternalError,
}

impl ErrorCode {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::RoomFull => "ROOM_FULL",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidId => "INVALID_ID",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a [`PointRepository`](crate::PointRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Id is zero or negative.
    #[error("invalid point id: {0}")]
    InvalidId(i64),

    /// Backend could not serve the request.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidId(_) => ErrorCode::InvalidId,
            Self::Unavailable(_) => ErrorCode::InternalError,
        }
    }
}

/// Errors delivering a message to a [`Peer`](crate::Peer).
#[derive(Debug, Error)]
pub enum PeerError {
    /// Peer is closed; no further writes are accepted.
    #[error("connection closed")]
    Closed,

    /// Value could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PeerError {
    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Closed => ErrorCode::ConnectionClosed,
            Self::Encode(_) => ErrorCode::InternalError,
        }
    }
}
