//! Per-key request coalescing.
//!
//! The first caller for a key spawns the work; later callers for the same key
//! await the same shared handle. The spawned task removes its own map entry
//! once it settles, so the next call after settlement starts fresh work.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// The shared work did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError {
    #[error("in-flight task panicked")]
    Panicked,
    #[error("in-flight task was cancelled")]
    Cancelled,
}

/// Outcome observed by one caller.
#[derive(Debug, Clone)]
pub struct FlightResult<T> {
    pub value: Result<T, FlightError>,
    /// True when this caller joined work started by another caller
    pub coalesced: bool,
}

type FlightHandle<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;

/// Map from key to the in-flight operation for that key.
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    inflight: Arc<Mutex<HashMap<K, FlightHandle<T>>>>,
}

impl<K, T: Clone> Clone for SingleFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<K, T: Clone> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key` unless work for `key` is already in flight.
    ///
    /// `make` is only invoked by the caller that starts the work. The work
    /// runs on its own task, so it completes even if every caller is dropped.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> FlightResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (handle, coalesced) = {
            let mut map = self.inflight.lock().await;
            match map.get(&key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let inflight = Arc::clone(&self.inflight);
                    let task_key = key.clone();
                    let work = make();

                    let task = tokio::spawn(async move {
                        let out = AssertUnwindSafe(work)
                            .catch_unwind()
                            .await
                            .map_err(|_| FlightError::Panicked);
                        inflight.lock().await.remove(&task_key);
                        out
                    });

                    let handle = async move {
                        match task.await {
                            Ok(out) => out,
                            Err(e) if e.is_panic() => Err(FlightError::Panicked),
                            Err(_) => Err(FlightError::Cancelled),
                        }
                    }
                    .boxed()
                    .shared();

                    map.insert(key.clone(), handle.clone());
                    (handle, false)
                }
            }
        };

        if coalesced {
            debug!(key = ?key, "Joining in-flight operation");
        }

        FlightResult {
            value: handle.await,
            coalesced,
        }
    }

    /// Whether work for `key` is currently in flight.
    pub async fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().await.contains_key(key)
    }

    /// Number of keys currently in flight.
    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                flights
                    .run("k".to_string(), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        7
                    })
                    .await
            }));
        }

        // Let every caller register before releasing the work.
        while !flights.is_in_flight(&"k".to_string()).await {
            tokio::task::yield_now().await;
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let mut coalesced = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.value, Ok(7));
            if result.coalesced {
                coalesced += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(coalesced, 7);
        assert!(flights.is_empty().await);
    }

    #[tokio::test]
    async fn test_entry_removed_after_settle() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();

        let first = flights.run("k", || async { 1 }).await;
        let second = flights.run("k", || async { 2 }).await;

        assert_eq!(first.value, Ok(1));
        assert_eq!(second.value, Ok(2));
        assert!(!second.coalesced);
        assert!(flights.is_empty().await);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_and_clears_entry() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();

        let result = flights
            .run("k", || async {
                if true {
                    panic!("boom");
                }
                0
            })
            .await;

        assert_eq!(result.value, Err(FlightError::Panicked));
        assert!(!flights.is_in_flight(&"k").await);
        assert_eq!(flights.run("k", || async { 3 }).await.value, Ok(3));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.run(1, || async { 10 }),
            flights.run(2, || async { 20 })
        );
        assert_eq!(a.value, Ok(10));
        assert_eq!(b.value, Ok(20));
        assert!(!a.coalesced && !b.coalesced);
    }
}
