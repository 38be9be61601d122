//! Flussu error types.

use thiserror::Error;

/// Errors shared across the Flussu crates.
#[derive(Debug, Error)]
pub enum FlussuError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlussuError>;
