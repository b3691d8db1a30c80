//! Identifier newtypes.
//!
//! [`ConnectionId`] wraps a UUID v7 string so connection ids sort by accept
//! time. [`PointId`] wraps the positive integer that names a point entity;
//! zero and negative values are rejected at construction.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::POINT_ROOM_PREFIX;
use crate::errors::RepositoryError;

/// Unique identifier for one accepted connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a point entity. Always strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PointId(i64);

impl PointId {
    /// Validate and wrap a raw id.
    pub fn new(raw: i64) -> Result<Self, RepositoryError> {
        if raw <= 0 {
            return Err(RepositoryError::InvalidId(raw));
        }
        Ok(Self(raw))
    }

    /// Raw integer value.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }

    /// Name of the room that receives this point's position updates.
    #[must_use]
    pub fn room_id(self) -> String {
        format!("{POINT_ROOM_PREFIX}{}", self.0)
    }
}

impl TryFrom<i64> for PointId {
    type Error = RepositoryError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl<'de> Deserialize<'de> for PointId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_id_is_uuid_v7() {
        let id = ConnectionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn point_id_rejects_zero_and_negative() {
        assert_matches!(PointId::new(0), Err(RepositoryError::InvalidId(0)));
        assert_matches!(PointId::new(-3), Err(RepositoryError::InvalidId(-3)));
        assert_eq!(PointId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn point_room_name_is_prefixed() {
        assert_eq!(PointId::new(1).unwrap().room_id(), "point_1");
        assert_eq!(PointId::new(42).unwrap().room_id(), "point_42");
    }

    #[test]
    fn point_id_deserialize_validates() {
        let id: PointId = serde_json::from_str("5").unwrap();
        assert_eq!(id.get(), 5);
        assert!(serde_json::from_str::<PointId>("0").is_err());
    }
}
