//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Running point sessions.
    pub active_sessions: usize,
}

/// Live counters reported by `/health`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCounts {
    /// Registered connections.
    pub connections: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Running sessions.
    pub sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, counts: HealthCounts, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: counts.connections,
        rooms: counts.rooms,
        active_sessions: counts.sessions,
    }
}
