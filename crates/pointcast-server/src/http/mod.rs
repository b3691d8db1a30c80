//! HTTP endpoints next to the WebSocket gateway.

pub mod api;
pub mod health;
