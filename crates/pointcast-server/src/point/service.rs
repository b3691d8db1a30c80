//! Point queries for the HTTP API.

use std::sync::Arc;

use pointcast_core::{PointId, PointRepository, PointResponse, RepositoryError};

/// Read-only access to points.
pub struct PointService {
    repo: Arc<dyn PointRepository>,
}

impl PointService {
    /// Service over `repo`.
    pub fn new(repo: Arc<dyn PointRepository>) -> Self {
        Self { repo }
    }

    /// Current position of point `raw_id`. Ids of zero or less are rejected
    /// before the repository is consulted.
    pub async fn get_point(&self, raw_id: i64) -> Result<PointResponse, RepositoryError> {
        let id = PointId::new(raw_id)?;
        let point = self.repo.get(id).await?;
        Ok(PointResponse {
            id,
            point: point.position(),
        })
    }
}

impl std::fmt::Debug for PointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pointcast_core::InMemoryPointRepository;

    fn service() -> PointService {
        PointService::new(Arc::new(InMemoryPointRepository::default()))
    }

    #[tokio::test]
    async fn returns_seeded_point() {
        let response = service().get_point(1).await.unwrap();
        insta::assert_json_snapshot!(response, @r#"
        {
          "id": 1,
          "point": {
            "x": 400,
            "y": 300
          }
        }
        "#);
    }

    #[tokio::test]
    async fn unknown_point_reads_as_default() {
        let response = service().get_point(42).await.unwrap();
        assert_eq!(response.id.get(), 42);
        assert_eq!((response.point.x, response.point.y), (400, 300));
    }

    #[tokio::test]
    async fn rejects_non_positive_ids() {
        assert_matches!(service().get_point(0).await, Err(RepositoryError::InvalidId(0)));
        assert_matches!(service().get_point(-3).await, Err(RepositoryError::InvalidId(-3)));
    }
}
