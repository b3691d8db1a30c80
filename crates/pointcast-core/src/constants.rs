//! Package-level constants.

/// Current version of Pointcast (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "pointcast";

/// Prefix of the room that carries position updates for one point.
pub const POINT_ROOM_PREFIX: &str = "point_";

/// Metadata key binding a connection to the point it controls.
pub const POINT_ID_METADATA_KEY: &str = "point_id";

/// Point bound to a connection that never named one.
pub const DEFAULT_POINT_ID: i64 = 1;
