//! Error types for KvHub
//!
//! Provides a unified error type for registry, dispatcher and engine operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Unified error type for KvHub operations
#[derive(Debug, Error)]
pub enum HubError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Dispatch Errors
    // -------------------------------------------------------------------------
    /// The configured engine identifier matches no known adapter.
    #[error("unsupported engine: {identifier}")]
    UnsupportedEngine { identifier: String },

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("invalid database name: {0:?}")]
    InvalidName(String),

    /// The adapter failed to open a database. Nothing is cached, so the
    /// next lookup retries.
    #[error("failed to open database '{name}' at {}: {source}", path.display())]
    OpenFailure {
        name: String,
        path: PathBuf,
        #[source]
        source: Box<HubError>,
    },

    /// A database could not be opened during the startup scan.
    #[error("startup scan skipped database '{name}': {source}")]
    ScanFailure {
        name: String,
        #[source]
        source: Box<HubError>,
    },

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("engine handle at {} is closed", .0.display())]
    Closed(PathBuf),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for HubError {
    fn from(err: bincode::Error) -> Self {
        HubError::Serialization(err.to_string())
    }
}
