//! The point entity.
//!
//! A [`Point`] is a position inside `[0, max_x) × [0, max_y)`. The only
//! mutation is [`Point::move_by`], which adds a delta and clamps, so the
//! invariant holds after every call.

use serde::{Deserialize, Serialize, Serializer};

/// Default X coordinate for a fresh point.
pub const DEFAULT_X: i32 = 400;
/// Default Y coordinate for a fresh point.
pub const DEFAULT_Y: i32 = 300;
/// Default exclusive upper bound for X.
pub const DEFAULT_MAX_X: i32 = 800;
/// Default exclusive upper bound for Y.
pub const DEFAULT_MAX_Y: i32 = 600;

/// Exclusive upper bounds of a point's plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    /// Exclusive upper bound for X.
    pub max_x: i32,
    /// Exclusive upper bound for Y.
    pub max_y: i32,
}

impl Bounds {
    /// Build bounds; non-positive values fall back to the defaults.
    #[must_use]
    pub fn new(max_x: i32, max_y: i32) -> Self {
        Self {
            max_x: if max_x > 0 { max_x } else { DEFAULT_MAX_X },
            max_y: if max_y > 0 { max_y } else { DEFAULT_MAX_Y },
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_X, DEFAULT_MAX_Y)
    }
}

/// Wire form of a point's coordinates: `{"x": .., "y": ..}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

/// A bounded 2-D point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    x: i32,
    y: i32,
    bounds: Bounds,
}

impl Point {
    /// Create a point. Zero coordinates and non-positive bounds take their
    /// defaults; the result is clamped.
    #[must_use]
    pub fn new(x: i32, y: i32, max_x: i32, max_y: i32) -> Self {
        let mut point = Self {
            x: if x == 0 { DEFAULT_X } else { x },
            y: if y == 0 { DEFAULT_Y } else { y },
            bounds: Bounds::new(max_x, max_y),
        };
        point.clamp();
        point
    }

    /// Default point inside the given bounds.
    #[must_use]
    pub fn with_bounds(bounds: Bounds) -> Self {
        Self::new(0, 0, bounds.max_x, bounds.max_y)
    }

    /// Rebuild a point from stored values without applying the zero
    /// coordinate defaults, so a point parked at the origin stays there.
    /// Non-positive bounds still fall back to the defaults.
    #[must_use]
    pub fn at(position: Position, bounds: Bounds) -> Self {
        let mut point = Self {
            x: position.x,
            y: position.y,
            bounds: Bounds::new(bounds.max_x, bounds.max_y),
        };
        point.clamp();
        point
    }

    /// Add a delta, then clamp each axis into bounds.
    pub fn move_by(&mut self, dx: i32, dy: i32) {
        self.x = self.x.saturating_add(dx);
        self.y = self.y.saturating_add(dy);
        self.clamp();
    }

    fn clamp(&mut self) {
        self.x = self.x.clamp(0, self.bounds.max_x - 1);
        self.y = self.y.clamp(0, self.bounds.max_y - 1);
    }

    /// X coordinate.
    #[must_use]
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Y coordinate.
    #[must_use]
    pub fn y(&self) -> i32 {
        self.y
    }

    /// Plane bounds.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Coordinates only.
    #[must_use]
    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }

    /// Whether the coordinates lie inside the bounds.
    #[must_use]
    pub fn is_within_bounds(&self) -> bool {
        (0..self.bounds.max_x).contains(&self.x) && (0..self.bounds.max_y).contains(&self.y)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::with_bounds(Bounds::default())
    }
}

// Bounds are server-side state; only coordinates go on the wire.
impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.position().serialize(serializer)
    }
}
