//! HTTP(S) object fetcher.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::fetcher::{finish_partial, partial_path, prepare_dest, scheme_of, ObjectFetcher};

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("vprep/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpFetcherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("VPREP_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: std::env::var("VPREP_HTTP_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            user_agent: defaults.user_agent,
        }
    }
}

/// Streams `http://` and `https://` objects to disk.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| StorageError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn stream_into(&self, url: &str, path: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::from_http_status(status.as_u16(), url));
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::download_failed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl ObjectFetcher for HttpFetcher {
    fn supports(&self, locator: &str) -> bool {
        matches!(scheme_of(locator).as_deref(), Some("http") | Some("https"))
    }

    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> StorageResult<u64> {
        debug!(url = locator, dest = %dest.display(), "HTTP download starting");
        prepare_dest(dest).await?;

        let partial = partial_path(dest);
        let outcome = self.stream_into(locator, &partial).await;
        let bytes = finish_partial(&partial, dest, outcome).await?;

        info!(url = locator, bytes, "HTTP download complete");
        Ok(bytes)
    }
}
