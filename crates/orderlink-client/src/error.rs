//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(#[from] orderlink_core::CoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] orderlink_sync::SyncError),

    #[error("REST error: {0}")]
    Rest(#[from] orderlink_rest::RestError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] orderlink_telemetry::TelemetryError),

    #[error("Channel not connected after {0} ms")]
    ConnectTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
