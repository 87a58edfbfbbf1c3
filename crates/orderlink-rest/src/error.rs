//! REST error types.

use orderlink_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RestError {
    /// 5xx, 429 and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpClient(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Json(_) => false,
        }
    }
}

impl From<RestError> for SyncError {
    fn from(e: RestError) -> Self {
        SyncError::Fetch {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;
