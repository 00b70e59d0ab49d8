//! Background eviction of stale cache entries.
//!
//! Never started implicitly; the composition root spawns it and keeps the
//! handle for shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::asset_cache::AssetCache;
use crate::config::AssetCacheConfig;

/// Handle to a running janitor task.
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the janitor and wait for the current sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Janitor task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Periodically evicts settled cache entries older than `retention`.
pub struct ScratchJanitor {
    cache: AssetCache,
    retention: Duration,
    interval: Duration,
}

impl ScratchJanitor {
    pub fn new(cache: AssetCache, retention: Duration, interval: Duration) -> Self {
        Self {
            cache,
            retention,
            interval,
        }
    }

    /// Janitor using the retention and sweep interval from `config`.
    pub fn from_config(cache: AssetCache, config: &AssetCacheConfig) -> Self {
        Self::new(cache, config.retention, config.sweep_interval)
    }

    /// Spawn the sweep loop. The first sweep runs one `interval` after start.
    pub fn spawn(self) -> JanitorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        JanitorHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // `interval` panics on a zero period.
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            dir = %self.cache.dir().display(),
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Scratch janitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.cache.evict_older_than(self.retention).await {
                        Ok(0) => debug!("Janitor sweep found nothing to evict"),
                        Ok(evicted) => info!(evicted, "Janitor sweep evicted cache entries"),
                        Err(e) => warn!(error = %e, "Janitor sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scratch janitor stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_cache::CacheOptions;
    use crate::testing::FakeFetcher;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> AssetCache {
        AssetCache::new(
            AssetCacheConfig {
                dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(FakeFetcher::new(16)),
        )
    }

    #[tokio::test]
    async fn test_sweeps_expired_entries() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let url = "https://cdn.example.com/a.mp4";
        let entry = cache.get(url, CacheOptions::default()).await;
        assert!(entry.is_ready());

        let handle = ScratchJanitor::new(cache.clone(), Duration::ZERO, Duration::from_millis(20)).spawn();

        let mut evicted = false;
        for _ in 0..100 {
            if cache.entry(url).await.is_none() && !entry.local_path.exists() {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let dir = TempDir::new().unwrap();
        let handle = ScratchJanitor::new(cache(&dir), Duration::from_secs(3600), Duration::from_secs(3600)).spawn();
        assert!(!handle.is_finished());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("janitor did not stop");
    }
}
