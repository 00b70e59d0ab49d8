//! Cluster client error types.

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Cluster returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::ServiceUnavailable(_) | ClusterError::Network(_) => true,
            ClusterError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
