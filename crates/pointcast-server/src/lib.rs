//! # pointcast-server
//!
//! Real-time point control over WebSockets.
//!
//! - [`websocket`]: connections, rooms, action routing and the [`Manager`]
//!   that ties them together with hooks, middleware and shutdown
//! - [`point`]: `move`/`subscribe` actions and the batching sessions behind them
//! - [`server`]: the Axum front end (`/ws`, `/health`, `/metrics`, `/api/point/{id}`)
//! - [`config`]: runtime configuration built from settings
//! - [`metrics`]: Prometheus recorder and metric names
//! - [`shutdown`]: signal handling and task draining

#![deny(unsafe_code)]

pub mod config;
pub mod http;
pub mod metrics;
pub mod point;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ConnectionConfig, ManagerConfig, ServerConfig, SessionConfig};
pub use point::{PointHandler, PointService};
pub use server::{AppState, PointcastServer, ServerError};
pub use websocket::{Connection, Manager, ManagerError, Room, Router, Transport};
