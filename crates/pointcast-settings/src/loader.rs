//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PointcastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `POINTCAST_*` environment overrides
//! 4. Replace zero values with defaults

use std::path::{Path, PathBuf};

use pointcast_logging::{LogFormat, LogLevel};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PointcastSettings;

/// Resolve the settings file: `$POINTCAST_HOME/settings.json`, falling back
/// to `~/.pointcast/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(home) = std::env::var_os("POINTCAST_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join("settings.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pointcast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PointcastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PointcastSettings> {
    let mut settings = read_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings.normalized())
}

fn read_file_layer(path: &Path) -> Result<PointcastSettings> {
    let defaults = serde_json::to_value(PointcastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `lookup` (normally `std::env::var`).
///
/// Values that fail to parse or fall outside their range are ignored with
/// a warning.
pub fn apply_overrides<F>(settings: &mut PointcastSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("POINTCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("POINTCAST_PORT", 1u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("POINTCAST_LOG_LEVEL") {
        settings.logging.level = LogLevel::from_str_lossy(&v);
    }
    if let Some(v) = env.string("POINTCAST_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "POINTCAST_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
    if let Some(v) = env.ranged("POINTCAST_MAX_CONNECTIONS_PER_ROOM", 0usize, 1_000_000) {
        settings.websocket.max_connections_per_room = v;
    }
    if let Some(v) = env.ranged("POINTCAST_SHUTDOWN_TIMEOUT_SECS", 1u64, 3_600) {
        settings.websocket.shutdown_timeout_secs = v;
    }
    if let Some(v) = env.ranged("POINTCAST_BATCH_INTERVAL_MS", 1u64, 60_000) {
        settings.point.batch_interval_ms = v;
    }
    if let Some(v) = env.ranged("POINTCAST_SAVE_INTERVAL_SECS", 1u64, 86_400) {
        settings.point.save_interval_secs = v;
    }
    if let Some(v) = env.ranged("POINTCAST_MAX_X", 1i32, 1_000_000) {
        settings.point.max_x = v;
    }
    if let Some(v) = env.ranged("POINTCAST_MAX_Y", 1i32, 1_000_000) {
        settings.point.max_y = v;
    }
}

/// Parse a string as a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, PointcastSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "point": {"maxX": 1024, "batchIntervalMs": 33}}"#,
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.point.max_x, 1024);
        assert_eq!(settings.point.max_y, 600);
        assert_eq!(settings.point.batch_interval_ms, 33);
    }

    #[test]
    fn load_zero_values_normalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"websocket": {"shutdownTimeoutSecs": 0}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.websocket.shutdown_timeout_secs, 30);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn load_wrong_type_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Schema(_)));
    }

    #[test]
    fn overrides_apply() {
        let mut settings = PointcastSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("POINTCAST_HOST", "127.0.0.1"),
                ("POINTCAST_PORT", "9000"),
                ("POINTCAST_LOG_LEVEL", "debug"),
                ("POINTCAST_LOG_FORMAT", "json"),
                ("POINTCAST_MAX_CONNECTIONS_PER_ROOM", "2"),
                ("POINTCAST_BATCH_INTERVAL_MS", "50"),
                ("POINTCAST_MAX_Y", "480"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.websocket.max_connections_per_room, 2);
        assert_eq!(settings.point.batch_interval_ms, 50);
        assert_eq!(settings.point.max_y, 480);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = PointcastSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("POINTCAST_PORT", "0"),
                ("POINTCAST_LOG_FORMAT", "xml"),
                ("POINTCAST_SAVE_INTERVAL_SECS", "soon"),
                ("POINTCAST_HOST", ""),
            ]),
        );
        assert_eq!(settings, PointcastSettings::default());
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range("10", 1u64, 10), Some(10));
        assert_eq!(parse_range("11", 1u64, 10), None);
        assert_eq!(parse_range(" 5 ", 1i32, 10), Some(5));
        assert_eq!(parse_range("-1", 0i32, 10), None);
        assert_eq!(parse_range("abc", 0u16, 10), None);
    }
}
