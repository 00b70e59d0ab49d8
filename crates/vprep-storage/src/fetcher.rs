//! Fetch-by-locator abstraction over the object store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Retrieves a remote object into a local file.
///
/// Implementations write to `dest` only on success; a failed fetch leaves
/// no file behind.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Returns true if this fetcher understands the locator's scheme.
    fn supports(&self, locator: &str) -> bool;

    /// Fetch `locator` into `dest`, returning the number of bytes written.
    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> StorageResult<u64>;
}

/// Lower-case scheme of a locator, if it has one.
pub fn scheme_of(locator: &str) -> Option<String> {
    url::Url::parse(locator).ok().map(|u| u.scheme().to_ascii_lowercase())
}

/// Sibling `.part` path used while downloading.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Create the parent of `dest` if needed.
pub(crate) async fn prepare_dest(dest: &Path) -> StorageResult<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Promote a finished partial file, or remove it when the download failed.
pub(crate) async fn finish_partial(
    partial: &Path,
    dest: &Path,
    outcome: StorageResult<u64>,
) -> StorageResult<u64> {
    match outcome {
        Ok(bytes) => {
            tokio::fs::rename(partial, dest).await?;
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial download");
                }
            }
            Err(e)
        }
    }
}

/// Routes each locator to the first fetcher that supports it.
#[derive(Clone, Default)]
pub struct ObjectStore {
    fetchers: Vec<Arc<dyn ObjectFetcher>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetcher; earlier registrations win.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ObjectFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }
}

#[async_trait]
impl ObjectFetcher for ObjectStore {
    fn supports(&self, locator: &str) -> bool {
        self.fetchers.iter().any(|f| f.supports(locator))
    }

    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> StorageResult<u64> {
        let fetcher = self
            .fetchers
            .iter()
            .find(|f| f.supports(locator))
            .ok_or_else(|| {
                StorageError::UnsupportedScheme(scheme_of(locator).unwrap_or_else(|| locator.to_string()))
            })?;

        debug!(locator, dest = %dest.display(), "Fetching object");
        fetcher.fetch_to_file(locator, dest).await
    }
}
