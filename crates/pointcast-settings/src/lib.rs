//! # pointcast-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PointcastSettings::default()`]
//! 2. **Settings file**: `$POINTCAST_HOME/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `POINTCAST_*` overrides
//!
//! Numeric values of zero are replaced by their defaults after loading,
//! except `maxConnectionsPerRoom` where zero means unlimited.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
