//! `PointcastServer`: Axum HTTP + WebSocket front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use pointcast_core::constants::POINT_ID_METADATA_KEY;
use pointcast_core::{ErrorPayload, Peer, PointId, PointRepository, RepositoryError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::http::api;
use crate::http::health::{self, HealthCounts, HealthResponse};
use crate::point::{PointHandler, PointService};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{Manager, Transport};

/// Errors starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured default point id is not valid.
    #[error("invalid default point: {0}")]
    DefaultPoint(#[source] RepositoryError),
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was tried.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// `listen` was called twice.
    #[error("server is already listening")]
    AlreadyListening,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection manager.
    pub manager: Arc<Manager>,
    /// Point actions, for session counts.
    pub points: Arc<PointHandler>,
    /// Point queries.
    pub service: Arc<PointService>,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Pointcast server.
pub struct PointcastServer {
    config: ServerConfig,
    state: AppState,
    shutdown: ShutdownCoordinator,
    serve_task: Mutex<Option<JoinHandle<()>>>,
}

impl PointcastServer {
    /// Wire `manager` to `repo` and register the point actions.
    pub fn new(config: ServerConfig, repo: Arc<dyn PointRepository>, manager: Manager) -> Result<Self, ServerError> {
        let default_point = PointId::new(config.default_point_id).map_err(ServerError::DefaultPoint)?;
        let manager = Arc::new(manager);
        let points = PointHandler::install(&manager, Arc::clone(&repo), config.session, default_point);
        let state = AppState {
            manager,
            points,
            service: Arc::new(PointService::new(repo)),
            metrics: None,
            start_time: Instant::now(),
        };
        Ok(Self {
            config,
            state,
            shutdown: ShutdownCoordinator::new(),
            serve_task: Mutex::new(None),
        })
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(api::metrics))
            .route("/api/point/{id}", get(api::get_point))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and start serving in the background.
    pub async fn listen(&self) -> Result<SocketAddr, ServerError> {
        if self.serve_task.lock().is_some() {
            return Err(ServerError::AlreadyListening);
        }
        let addr = self.config.bind_addr();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "http server stopped with error");
            }
        });
        *self.serve_task.lock() = Some(task);
        info!(addr = %local_addr, "pointcast server listening");
        Ok(local_addr)
    }

    /// Close every connection, then stop the HTTP listener.
    pub async fn shutdown(&self) {
        self.state.manager.shutdown().await;
        let handles: Vec<_> = self.serve_task.lock().take().into_iter().collect();
        if !self
            .shutdown
            .graceful_shutdown(handles, Some(self.state.manager.shutdown_timeout()))
            .await
        {
            warn!("http listener did not stop in time");
        }
        info!("pointcast server stopped");
    }

    /// Connection manager.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.state.manager
    }

    /// Point actions.
    pub fn points(&self) -> &Arc<PointHandler> {
        &self.state.points
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down() || self.state.manager.is_shutting_down()
    }
}

impl std::fmt::Debug for PointcastServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointcastServer")
            .field("config", &self.config)
            .field("manager", &self.state.manager)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    point: Option<i64>,
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, Query(params): Query<WsParams>, State(state): State<AppState>) -> Response {
    if state.manager.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let point = match params.point.map(PointId::new).transpose() {
        Ok(point) => point,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ErrorPayload::new(e.code(), e.to_string()))).into_response(),
    };
    ws.on_upgrade(move |socket| async move {
        let conn = state.manager.accept(Transport::from(socket));
        if let Some(point) = point {
            conn.set_metadata(POINT_ID_METADATA_KEY, Value::from(point.get()));
        }
        if let Err(e) = state.manager.serve(conn).await {
            debug!(error = %e, "websocket connection refused");
        }
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = HealthCounts {
        connections: state.manager.connection_count(),
        rooms: state.manager.room_count(),
        sessions: state.points.session_count(),
    };
    Json(health::health_check(state.start_time, counts, state.manager.is_shutting_down()))
}
