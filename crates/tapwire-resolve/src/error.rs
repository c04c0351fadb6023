//! Error types for resolver construction and configuration.
//!
//! Resolution itself never fails: an unresolvable host yields an empty
//! address list.

use std::path::PathBuf;

use thiserror::Error;

/// Resolver error type.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Failed to read a configuration file.
    #[error("Failed to read resolver config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration JSON could not be parsed.
    #[error("Invalid resolver config: {0}")]
    Json(#[from] serde_json::Error),

    /// A remapping entry has an empty side.
    #[error("Invalid remapping '{original}' -> '{replacement}'")]
    InvalidRemapping {
        original: String,
        replacement: String,
    },

    /// A DNS backend could not be initialised.
    #[error("Failed to initialise DNS backend: {0}")]
    Backend(String),
}

/// Result type alias for resolver construction.
pub type Result<T> = std::result::Result<T, ResolverError>;
