//! Point storage contract.
//!
//! Callers cancel an in-flight `get` or `save` by dropping its future;
//! implementations must not leave partial writes behind when that happens.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::RepositoryError;
use crate::ids::PointId;
use crate::point::{Bounds, Point};

/// Read/write access to point snapshots.
///
/// Implementations are expected to make each `get` and each `save` atomic
/// per id. Nothing above this trait serializes concurrent writers.
#[async_trait]
pub trait PointRepository: Send + Sync {
    /// Current snapshot of a point.
    async fn get(&self, id: PointId) -> Result<Point, RepositoryError>;

    /// Store a snapshot, creating the entry if it does not exist.
    async fn save(&self, id: PointId, point: &Point) -> Result<(), RepositoryError>;
}

/// Process-local repository backed by a map under one lock.
///
/// Seeded with the default point at id 1. Unknown ids read as a fresh
/// default point inside the configured bounds.
pub struct InMemoryPointRepository {
    bounds: Bounds,
    points: RwLock<HashMap<PointId, Point>>,
}

impl InMemoryPointRepository {
    /// Create a repository whose points live inside `bounds`.
    #[must_use]
    pub fn new(bounds: Bounds) -> Self {
        let mut points = HashMap::new();
        if let Ok(seed) = PointId::new(crate::constants::DEFAULT_POINT_ID) {
            let _ = points.insert(seed, Point::with_bounds(bounds));
        }
        Self {
            bounds,
            points: RwLock::new(points),
        }
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

impl Default for InMemoryPointRepository {
    fn default() -> Self {
        Self::new(Bounds::default())
    }
}

#[async_trait]
impl PointRepository for InMemoryPointRepository {
    async fn get(&self, id: PointId) -> Result<Point, RepositoryError> {
        let stored = self.points.read().get(&id).copied();
        Ok(stored.unwrap_or_else(|| Point::with_bounds(self.bounds)))
    }

    async fn save(&self, id: PointId, point: &Point) -> Result<(), RepositoryError> {
        let _ = self.points.write().insert(id, *point);
        tracing::trace!(point_id = %id, x = point.x(), y = point.y(), "point saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Position;

    fn id(raw: i64) -> PointId {
        PointId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn seeded_with_default_point() {
        let repo = InMemoryPointRepository::default();
        assert_eq!(repo.len(), 1);
        let p = repo.get(id(1)).await.unwrap();
        assert_eq!(p.position(), Position { x: 400, y: 300 });
    }

    #[tokio::test]
    async fn unknown_id_reads_default_in_configured_bounds() {
        let repo = InMemoryPointRepository::new(Bounds::new(100, 80));
        let p = repo.get(id(9)).await.unwrap();
        assert_eq!(p.bounds(), Bounds { max_x: 100, max_y: 80 });
        assert_eq!(p.position(), Position { x: 99, y: 79 });
        // reading does not create an entry
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn save_then_get_returns_snapshot() {
        let repo = InMemoryPointRepository::default();
        let mut p = repo.get(id(1)).await.unwrap();
        p.move_by(10, 10);
        repo.save(id(1), &p).await.unwrap();
        assert_eq!(repo.get(id(1)).await.unwrap(), p);
    }

    #[tokio::test]
    async fn save_creates_missing_entry() {
        let repo = InMemoryPointRepository::default();
        let p = Point::new(5, 6, 800, 600);
        repo.save(id(2), &p).await.unwrap();
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.get(id(2)).await.unwrap().position(), Position { x: 5, y: 6 });
    }

    #[tokio::test]
    async fn get_returns_a_copy() {
        let repo = InMemoryPointRepository::default();
        let mut p = repo.get(id(1)).await.unwrap();
        p.move_by(1, 1);
        assert_eq!(repo.get(id(1)).await.unwrap().position(), Position { x: 400, y: 300 });
    }
}
