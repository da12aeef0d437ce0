//! Startup-level errors — configuration and I/O failures that can occur
//! before the axum server exists to turn them into HTTP responses.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BootError>;
