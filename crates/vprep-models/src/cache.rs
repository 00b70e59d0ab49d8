//! Asset cache entries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle of a cache entry: `Pending` transitions exactly once to
/// `Ready` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Pending => "pending",
            CacheStatus::Ready => "ready",
            CacheStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_settled(&self) -> bool {
        !matches!(self, CacheStatus::Pending)
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A remote asset mirrored into local scratch storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    pub source_url: String,
    pub local_path: PathBuf,
    /// `file://` URL of `local_path`
    pub local_url: String,
    pub status: CacheStatus,
    pub error_message: Option<String>,
    /// Bytes on disk once ready
    pub byte_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Create a pending entry.
    pub fn pending(
        source_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
        local_url: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            local_path: local_path.into(),
            local_url: local_url.into(),
            status: CacheStatus::Pending,
            error_message: None,
            byte_size: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Transition a pending entry to ready.
    pub fn into_ready(mut self, byte_size: u64) -> Self {
        self.status = CacheStatus::Ready;
        self.byte_size = Some(byte_size);
        self.error_message = None;
        self.settled_at = Some(Utc::now());
        self
    }

    /// Transition a pending entry to failed.
    pub fn into_failed(mut self, error: impl Into<String>) -> Self {
        self.status = CacheStatus::Failed;
        self.error_message = Some(error.into());
        self.settled_at = Some(Utc::now());
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == CacheStatus::Ready
    }
}

/// Counters reported by the asset cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined an in-flight fetch instead of starting one
    pub coalesced: u64,
    pub failures: u64,
    pub ready_entries: usize,
    pub bytes_on_disk: u64,
}

impl CacheStats {
    /// Fraction of lookups served without a new fetch.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            return 0.0;
        }
        (self.hits + self.coalesced) as f64 / total as f64
    }
}
