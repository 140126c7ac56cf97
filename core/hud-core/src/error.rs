//! Error types for hud-core operations.
//!
//! Most read paths degrade instead of erroring (missing or corrupt files read as
//! absent). `HudError` is reserved for failures a caller can retry or report.

use std::path::PathBuf;

/// All errors that can occur in hud-core operations.
#[derive(Debug, thiserror::Error)]
pub enum HudError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid relay credentials: {0}")]
    InvalidCredentials(String),

    // ─────────────────────────────────────────────────────────────────────
    // Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Relay Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Relay(#[from] crate::relay::RelayError),
}

impl HudError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HudError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        HudError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using HudError.
pub type Result<T> = std::result::Result<T, HudError>;

// Conversion for string error compatibility
impl From<HudError> for String {
    fn from(err: HudError) -> String {
        err.to_string()
    }
}
