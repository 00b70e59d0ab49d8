//! Local mirror of remote video assets.
//!
//! One fetch per URL per cache lifetime: ready entries are served as hits,
//! concurrent requests for a URL share one download, and a failed fetch is
//! recorded but retried on the next request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vprep_models::{CacheEntry, CacheStats, CacheStatus};
use vprep_storage::ObjectFetcher;

use crate::config::AssetCacheConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::single_flight::SingleFlight;

/// Hex SHA-256 of a URL; the cache key and on-disk file stem.
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// File extension taken from the URL path, defaulting to `mp4`.
fn extension_for(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

pub(crate) fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

/// Per-call cache options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Drop any ready entry and download again
    pub force_refresh: bool,
    /// Overrides the configured fetch timeout
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    coalesced: u64,
    failures: u64,
}

/// Asset cache service.
#[derive(Clone)]
pub struct AssetCache {
    config: AssetCacheConfig,
    fetcher: Arc<dyn ObjectFetcher>,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    flights: SingleFlight<String, CacheEntry>,
    counters: Arc<Mutex<Counters>>,
}

impl AssetCache {
    pub fn new(config: AssetCacheConfig, fetcher: Arc<dyn ObjectFetcher>) -> Self {
        Self {
            config,
            fetcher,
            entries: Arc::new(Mutex::new(HashMap::new())),
            flights: SingleFlight::new(),
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Local path an asset is stored at.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.config
            .dir
            .join(format!("{}.{}", url_hash(url), extension_for(url)))
    }

    /// Return the cached asset for `url`, fetching it if necessary.
    ///
    /// Never fails: fetch errors come back as a `Failed` entry.
    pub async fn get(&self, url: &str, options: CacheOptions) -> CacheEntry {
        let key = url_hash(url);

        if let Some(entry) = self.lookup_ready(&key, options.force_refresh).await {
            self.counters.lock().await.hits += 1;
            metrics::record_cache_lookup("hit");
            debug!(url_hash = %&key[..12], "Cache hit");
            return entry;
        }

        let path = self.path_for(url);
        let timeout = options.timeout.unwrap_or(self.config.fetch_timeout);
        let fetcher = Arc::clone(&self.fetcher);
        let entries = Arc::clone(&self.entries);
        let task_key = key.clone();
        let task_url = url.to_string();

        let flight = self
            .flights
            .run(key.clone(), move || {
                fetch_entry(fetcher, entries, task_key, task_url, path, timeout)
            })
            .await;

        let entry = match flight.value {
            Ok(entry) => entry,
            Err(e) => {
                let failed = CacheEntry::pending(url, self.path_for(url), file_url(&self.path_for(url)))
                    .into_failed(e.to_string());
                self.entries.lock().await.insert(key.clone(), failed.clone());
                failed
            }
        };

        let mut counters = self.counters.lock().await;
        if flight.coalesced {
            counters.coalesced += 1;
            metrics::record_cache_lookup("coalesced");
        } else {
            counters.misses += 1;
            metrics::record_cache_lookup("miss");
            if entry.status == CacheStatus::Failed {
                counters.failures += 1;
            }
        }

        entry
    }

    /// Ready entry whose file still exists, or `None` to trigger a fetch.
    async fn lookup_ready(&self, key: &str, force_refresh: bool) -> Option<CacheEntry> {
        let entry = self.entries.lock().await.get(key).cloned()?;
        if !entry.is_ready() {
            return None;
        }

        let on_disk = tokio::fs::try_exists(&entry.local_path).await.unwrap_or(false);
        if on_disk && !force_refresh {
            return Some(entry);
        }

        if !on_disk {
            warn!(path = %entry.local_path.display(), "Cached file vanished, refetching");
        }
        self.entries.lock().await.remove(key);
        None
    }

    /// Current entry for `url` in any state.
    pub async fn entry(&self, url: &str) -> Option<CacheEntry> {
        self.entries.lock().await.get(&url_hash(url)).cloned()
    }

    /// Remove `url` from the cache and delete its file.
    pub async fn evict(&self, url: &str) -> WorkerResult<bool> {
        let removed = self.entries.lock().await.remove(&url_hash(url));
        match removed {
            Some(entry) => {
                remove_file(&entry.local_path).await?;
                info!(url = %url, "Evicted cache entry");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Evict settled entries older than `age`. Returns the number evicted.
    pub async fn evict_older_than(&self, age: Duration) -> WorkerResult<usize> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| WorkerError::config_error(format!("retention out of range: {}", e)))?;
        let cutoff = Utc::now() - age;

        let expired: Vec<CacheEntry> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.settled_at.map_or(false, |t| t <= cutoff))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };

        for entry in &expired {
            remove_file(&entry.local_path).await?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted expired cache entries");
        }
        Ok(expired.len())
    }

    /// Drop every settled entry and its file.
    pub async fn clear(&self) -> WorkerResult<usize> {
        let drained: Vec<CacheEntry> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.status.is_settled())
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };

        for entry in &drained {
            remove_file(&entry.local_path).await?;
        }
        Ok(drained.len())
    }

    pub async fn stats(&self) -> CacheStats {
        let (ready_entries, bytes_on_disk) = {
            let entries = self.entries.lock().await;
            entries
                .values()
                .filter(|e| e.is_ready())
                .fold((0usize, 0u64), |(n, bytes), e| (n + 1, bytes + e.byte_size.unwrap_or(0)))
        };
        let counters = self.counters.lock().await;
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            coalesced: counters.coalesced,
            failures: counters.failures,
            ready_entries,
            bytes_on_disk,
        }
    }
}

async fn remove_file(path: &Path) -> WorkerResult<()> {
    vprep_media::remove_if_exists(path)
        .await
        .map(|_| ())
        .map_err(WorkerError::from)
}

/// Body of a single cache fill; runs on its own task.
async fn fetch_entry(
    fetcher: Arc<dyn ObjectFetcher>,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    key: String,
    url: String,
    path: PathBuf,
    timeout: Duration,
) -> CacheEntry {
    let pending = CacheEntry::pending(&url, &path, file_url(&path));
    entries.lock().await.insert(key.clone(), pending.clone());

    debug!(url = %url, path = %path.display(), "Fetching asset");
    let outcome = tokio::time::timeout(timeout, fetcher.fetch_to_file(&url, &path)).await;

    let settled = match outcome {
        Ok(Ok(bytes)) => {
            info!(url = %url, bytes, "Asset cached");
            metrics::record_cache_fetch(Some(bytes));
            pending.into_ready(bytes)
        }
        Ok(Err(e)) => {
            warn!(url = %url, error = %e, "Asset fetch failed");
            metrics::record_cache_fetch(None);
            pending.into_failed(e.to_string())
        }
        Err(_) => {
            warn!(url = %url, timeout_secs = timeout.as_secs(), "Asset fetch timed out");
            metrics::record_cache_fetch(None);
            // The fetch future was dropped; its partial file may remain.
            let partial = vprep_media::partial_path(&path);
            if let Err(e) = vprep_media::remove_if_exists(&partial).await {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
            }
            pending.into_failed(format!("fetch timed out after {}s", timeout.as_secs()))
        }
    };

    entries.lock().await.insert(key, settled.clone());
    settled
}
