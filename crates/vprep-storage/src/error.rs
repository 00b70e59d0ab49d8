//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while fetching objects.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Unsupported locator scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    /// Map an HTTP status to the closest error.
    pub fn from_http_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        if status == 404 || status == 410 {
            Self::NotFound(url)
        } else {
            Self::HttpStatus { status, url }
        }
    }

    /// Check if a retry might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::DownloadFailed(_) | StorageError::AwsSdk(_) | StorageError::Io(_) => true,
            StorageError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
