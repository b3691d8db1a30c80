//! Runtime configuration for the server components.
//!
//! Each component takes its own small config struct. [`ServerConfig`]
//! bundles them and is built from [`PointcastSettings`].

use std::time::Duration;

use pointcast_core::point::Bounds;
use pointcast_settings::PointcastSettings;

/// Per-connection queue sizes and heartbeat timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Inbound frame queue.
    pub inbox_capacity: usize,
    /// Outbound frame queue.
    pub outbox_capacity: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Silence tolerated on top of `ping_interval` before the peer is dropped.
    pub pong_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
            outbox_capacity: 256,
            ping_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Manager-wide limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Settings for every connection the manager accepts.
    pub connection: ConnectionConfig,
    /// Member limit per room. Zero means unlimited.
    pub max_connections_per_room: usize,
    /// How long `shutdown` waits for connections to finish closing.
    pub shutdown_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_connections_per_room: 0,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Point session timing and queue sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interval between batch applications.
    pub batch_interval: Duration,
    /// Interval between unconditional saves.
    pub save_interval: Duration,
    /// Move command queue capacity.
    pub command_buffer: usize,
    /// Position update queue capacity.
    pub position_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(16),
            save_interval: Duration::from_secs(5),
            command_buffer: 50,
            position_buffer: 5,
        }
    }
}

/// Everything the server needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port. Zero picks a free port.
    pub port: u16,
    /// Manager limits.
    pub manager: ManagerConfig,
    /// Point session settings.
    pub session: SessionConfig,
    /// Plane bounds for new points.
    pub bounds: Bounds,
    /// Point bound to connections that never name one.
    pub default_point_id: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&PointcastSettings::default())
    }
}

impl From<&PointcastSettings> for ServerConfig {
    fn from(settings: &PointcastSettings) -> Self {
        let ws = &settings.websocket;
        let point = &settings.point;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            manager: ManagerConfig {
                connection: ConnectionConfig {
                    inbox_capacity: ws.inbox_capacity,
                    outbox_capacity: ws.outbox_capacity,
                    ping_interval: ws.ping_interval(),
                    pong_timeout: ws.pong_timeout(),
                },
                max_connections_per_room: ws.max_connections_per_room,
                shutdown_timeout: ws.shutdown_timeout(),
            },
            session: SessionConfig {
                batch_interval: point.batch_interval(),
                save_interval: point.save_interval(),
                command_buffer: point.command_buffer,
                position_buffer: point.position_buffer,
            },
            bounds: Bounds::new(point.max_x, point.max_y),
            default_point_id: point.default_point_id,
        }
    }
}

impl ServerConfig {
    /// `host:port` string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
