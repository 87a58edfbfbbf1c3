//! Error types for orderlink-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
