//! `/api/point/{id}` and `/metrics`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use pointcast_core::{ErrorPayload, RepositoryError};
use tracing::warn;

use crate::server::AppState;

/// GET /api/point/{id}
pub async fn get_point(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.service.get_point(id).await {
        Ok(point) => Json(point).into_response(),
        Err(error) => {
            let status = match error {
                RepositoryError::InvalidId(_) => StatusCode::BAD_REQUEST,
                RepositoryError::Unavailable(_) => {
                    warn!(point_id = id, error = %error, "point lookup failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(ErrorPayload::new(error.code(), error.to_string()))).into_response()
        }
    }
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
