//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON.
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The merged document has a value of the wrong type.
    #[error("settings do not match the schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
