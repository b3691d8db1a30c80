//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections refused during setup (counter, labels: reason).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound frames dropped on a full queue (counter).
pub const WS_MESSAGES_DROPPED_TOTAL: &str = "ws_messages_dropped_total";
/// Frames that failed routing (counter, labels: code).
pub const WS_ROUTE_ERRORS_TOTAL: &str = "ws_route_errors_total";
/// Active rooms (gauge).
pub const WS_ROOMS_ACTIVE: &str = "ws_rooms_active";
/// Batches applied (counter).
pub const SESSION_BATCHES_TOTAL: &str = "session_batches_total";
/// Move commands dropped on a full session queue (counter).
pub const SESSION_COMMANDS_DROPPED_TOTAL: &str = "session_commands_dropped_total";
/// Repository failures inside a session (counter, labels: op).
pub const SESSION_REPOSITORY_ERRORS_TOTAL: &str = "session_repository_errors_total";
/// Active point sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTIONS_REJECTED_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            WS_MESSAGES_DROPPED_TOTAL,
            WS_ROUTE_ERRORS_TOTAL,
            WS_ROOMS_ACTIVE,
            SESSION_BATCHES_TOTAL,
            SESSION_COMMANDS_DROPPED_TOTAL,
            SESSION_REPOSITORY_ERRORS_TOTAL,
            SESSIONS_ACTIVE,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
