//! Settings types.
//!
//! All sections use `camelCase` keys and `#[serde(default)]`, so a settings
//! file only needs the values it changes.

use std::time::Duration;

use pointcast_logging::{LogFormat, LogLevel};
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointcastSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Connection and room behaviour.
    pub websocket: WebSocketSettings,
    /// Point entity and session timing.
    pub point: PointSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PointcastSettings {
    /// Replace zero values with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let server = ServerSettings::default();
        if self.server.port == 0 {
            self.server.port = server.port;
        }
        if self.server.host.is_empty() {
            self.server.host = server.host;
        }

        let ws = WebSocketSettings::default();
        or_default(&mut self.websocket.ping_interval_secs, ws.ping_interval_secs);
        or_default(&mut self.websocket.pong_timeout_secs, ws.pong_timeout_secs);
        or_default(&mut self.websocket.inbox_capacity, ws.inbox_capacity);
        or_default(&mut self.websocket.outbox_capacity, ws.outbox_capacity);
        or_default(&mut self.websocket.shutdown_timeout_secs, ws.shutdown_timeout_secs);

        let point = PointSettings::default();
        if self.point.max_x <= 0 {
            self.point.max_x = point.max_x;
        }
        if self.point.max_y <= 0 {
            self.point.max_y = point.max_y;
        }
        or_default(&mut self.point.batch_interval_ms, point.batch_interval_ms);
        or_default(&mut self.point.save_interval_secs, point.save_interval_secs);
        or_default(&mut self.point.command_buffer, point.command_buffer);
        or_default(&mut self.point.position_buffer, point.position_buffer);
        if self.point.default_point_id <= 0 {
            self.point.default_point_id = point.default_point_id;
        }
        self
    }
}

fn or_default<T: Default + PartialEq>(value: &mut T, default: T) {
    if *value == T::default() {
        *value = default;
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Connection, room and shutdown settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Extra seconds of silence tolerated after a ping.
    pub pong_timeout_secs: u64,
    /// Inbound frame queue per connection.
    pub inbox_capacity: usize,
    /// Outbound frame queue per connection.
    pub outbox_capacity: usize,
    /// Member limit per room. Zero means unlimited.
    pub max_connections_per_room: usize,
    /// Upper bound on how long shutdown waits for connections to close.
    pub shutdown_timeout_secs: u64,
}

impl WebSocketSettings {
    /// Ping interval as a duration.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a duration.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 60,
            pong_timeout_secs: 10,
            inbox_capacity: 256,
            outbox_capacity: 256,
            max_connections_per_room: 0,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Point entity and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointSettings {
    /// Exclusive upper bound for X.
    pub max_x: i32,
    /// Exclusive upper bound for Y.
    pub max_y: i32,
    /// Milliseconds between batch ticks.
    pub batch_interval_ms: u64,
    /// Seconds between unconditional saves.
    pub save_interval_secs: u64,
    /// Command queue capacity per session.
    pub command_buffer: usize,
    /// Position update queue capacity per session.
    pub position_buffer: usize,
    /// Point a connection controls until it names another.
    pub default_point_id: i64,
}

impl PointSettings {
    /// Batch interval as a duration.
    #[must_use]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Save interval as a duration.
    #[must_use]
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

impl Default for PointSettings {
    fn default() -> Self {
        Self {
            max_x: 800,
            max_y: 600,
            batch_interval_ms: 16,
            save_interval_secs: 5,
            command_buffer: 50,
            position_buffer: 5,
            default_point_id: 1,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output encoding.
    pub format: LogFormat,
}
