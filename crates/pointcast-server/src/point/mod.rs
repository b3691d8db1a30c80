//! Point actions, batching sessions and queries.

pub mod handler;
pub mod service;
pub mod session;

pub use handler::PointHandler;
pub use service::PointService;
pub use session::{SessionHandle, spawn_session};
