//! Error types for the session manager

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Signing capability error: {0}")]
    Capability(String),

    #[error("Approval surface error: {0}")]
    Approval(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
