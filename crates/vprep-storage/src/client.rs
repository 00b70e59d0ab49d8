//! S3-compatible (R2) object fetcher.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::fetcher::{finish_partial, partial_path, prepare_dest, scheme_of, ObjectFetcher};

/// Configuration for the R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Bucket used for `r2://<key>` locators without an explicit bucket
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("VPREP_R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("VPREP_R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("VPREP_R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("VPREP_R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("VPREP_R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("VPREP_R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("VPREP_R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("VPREP_R2_BUCKET_NAME not set"))?,
            region: std::env::var("VPREP_R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Bucket and key addressed by an `r2://` or `s3://` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    /// Parse `s3://bucket/key` or `r2://bucket/key`.
    ///
    /// `r2:///key` (empty host) falls back to `default_bucket`.
    pub fn parse(locator: &str, default_bucket: &str) -> StorageResult<Self> {
        let url = url::Url::parse(locator)
            .map_err(|e| StorageError::InvalidLocator(format!("{}: {}", locator, e)))?;

        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(StorageError::InvalidLocator(format!("{}: missing object key", locator)));
        }

        let bucket = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => default_bucket.to_string(),
        };
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocator(format!("{}: missing bucket", locator)));
        }

        Ok(Self { bucket, key })
    }
}

/// Cloudflare R2 / S3 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(R2Config::from_env()?).await
    }

    /// Default bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Size of an object, or `NotFound`.
    pub async fn object_size(&self, location: &ObjectLocation) -> StorageResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_not_found() {
                    StorageError::not_found(&location.key)
                } else {
                    StorageError::AwsSdk(service.to_string())
                }
            })?;

        Ok(head.content_length().unwrap_or_default().max(0) as u64)
    }

    /// Stream an object into `dest` through a `.part` file.
    pub async fn download_to_file(&self, location: &ObjectLocation, dest: &Path) -> StorageResult<u64> {
        debug!(bucket = %location.bucket, key = %location.key, "Downloading object");
        prepare_dest(dest).await?;

        let partial = partial_path(dest);
        let outcome = self.stream_into(location, &partial).await;
        let bytes = finish_partial(&partial, dest, outcome).await?;

        info!(
            bucket = %location.bucket,
            key = %location.key,
            bytes,
            dest = %dest.display(),
            "Downloaded object"
        );
        Ok(bytes)
    }

    async fn stream_into(&self, location: &ObjectLocation, path: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::not_found(&location.key)
                } else {
                    StorageError::download_failed(service.to_string())
                }
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl ObjectFetcher for R2Client {
    fn supports(&self, locator: &str) -> bool {
        matches!(scheme_of(locator).as_deref(), Some("r2") | Some("s3"))
    }

    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> StorageResult<u64> {
        let location = ObjectLocation::parse(locator, &self.bucket)?;
        self.download_to_file(&location, dest).await
    }
}
