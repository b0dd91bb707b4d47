//! Errors raised while loading configuration and preparing the base directory.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid or unreadable settings, or a logger that could not start.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed `config.json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No home directory, or a runtime directory that cannot be created.
    #[error("Path error: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
