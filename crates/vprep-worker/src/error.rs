//! Pipeline error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Shared work panicked or was cancelled before producing a value.
    #[error("Task aborted: {0}")]
    TaskAborted(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vprep_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vprep_media::MediaError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] vprep_cluster::ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Io(_) => true,
            WorkerError::Storage(e) => e.is_retryable(),
            WorkerError::Cluster(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Invalid configuration; these fail fast instead of becoming result fields.
    pub fn is_config_error(&self) -> bool {
        matches!(self, WorkerError::ConfigError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_delegates_to_source() {
        let storage = WorkerError::from(vprep_storage::StorageError::from_http_status(502, "https://x"));
        assert!(storage.is_retryable());

        let cluster = WorkerError::from(vprep_cluster::ClusterError::http(400, "bad"));
        assert!(!cluster.is_retryable());

        assert!(WorkerError::config_error("fps must be positive").is_config_error());
        assert!(!WorkerError::config_error("x").is_retryable());
    }
}
