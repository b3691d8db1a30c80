//! # pointcast-core
//!
//! Foundation types shared by every Pointcast crate:
//!
//! - **IDs**: [`ConnectionId`] (UUID v7) and [`PointId`] (positive integer)
//! - **Entity**: [`Point`], a bounded 2-D position mutated only through [`Point::move_by`]
//! - **Repository**: the [`PointRepository`] read/write contract and an in-memory store
//! - **Protocol**: the inbound [`Envelope`] and the outbound payloads
//! - **Peer**: the narrow capability interface rooms, hooks and handlers use to
//!   talk to a connection without knowing its transport

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod peer;
pub mod point;
pub mod protocol;
pub mod repository;
pub mod testing;

pub use errors::{ErrorCode, PeerError, RepositoryError};
pub use ids::{ConnectionId, PointId};
pub use peer::Peer;
pub use point::{Bounds, Point, Position};
pub use protocol::{Envelope, ErrorPayload, MoveCommand, PointResponse, SubscribeCommand};
pub use repository::{InMemoryPointRepository, PointRepository};
