//! Common error types for histloader

use thiserror::Error;

/// Common result type for histloader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across histloader services
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation rejected because a conflicting one is in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Time-series store communication or protocol error
    #[error("Store error: {0}")]
    Store(String),

    /// Internal invariant violation (logic bug, not a user condition)
    #[error("Internal error: {0}")]
    Internal(String),
}
