//! Error types shared across HIN crates

use thiserror::Error;

/// Result type alias for shared HIN operations
pub type Result<T> = std::result::Result<T, HinError>;

/// Errors raised by the shared building blocks (CRS parsing, logging setup)
#[derive(Error, Debug)]
pub enum HinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid coordinate reference system: {0}")]
    InvalidCrs(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
