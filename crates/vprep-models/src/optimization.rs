//! Optimization records and engine statistics.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::metadata::VideoMetadata;

/// Optimization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::Pending => "pending",
            OptimizationStatus::Processing => "processing",
            OptimizationStatus::Completed => "completed",
            OptimizationStatus::Failed => "failed",
            OptimizationStatus::Skipped => "skipped",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Completed | OptimizationStatus::Failed | OptimizationStatus::Skipped
        )
    }
}

impl std::fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which asset downstream rendering should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedVersion {
    #[default]
    Original,
    Optimized,
    Fallback,
}

impl RecommendedVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedVersion::Original => "original",
            RecommendedVersion::Optimized => "optimized",
            RecommendedVersion::Fallback => "fallback",
        }
    }
}

/// Outcome of the three-way optimization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Asset is unusable downstream; substitute a fallback visual
    Fallback,
    /// Asset already satisfies the constraints
    Skip,
    /// Asset must be re-encoded
    Transcode,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::Fallback => "fallback",
            OptimizationStrategy::Skip => "skip",
            OptimizationStrategy::Transcode => "transcode",
        }
    }
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One optimization run for a source URL. Owned by the optimization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationRecord {
    pub source_url: String,
    pub original_path: PathBuf,
    pub optimized_path: Option<PathBuf>,
    /// Absent only when metadata extraction itself failed
    pub metadata: Option<VideoMetadata>,
    pub status: OptimizationStatus,
    pub use_fallback: bool,
    pub recommended_version: RecommendedVersion,
    pub strategy: Option<OptimizationStrategy>,
    pub original_size: Option<u64>,
    pub optimized_size: Option<u64>,
    /// optimized / original, below 1.0 when the file shrank
    pub compression_ratio: Option<f64>,
    pub processing_time_ms: Option<u64>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OptimizationRecord {
    /// Create a pending record.
    pub fn new(source_url: impl Into<String>, original_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            original_path: original_path.into(),
            optimized_path: None,
            metadata: None,
            status: OptimizationStatus::Pending,
            use_fallback: false,
            recommended_version: RecommendedVersion::Original,
            strategy: None,
            original_size: None,
            optimized_size: None,
            compression_ratio: None,
            processing_time_ms: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark the record terminal with the given status.
    pub fn finish(&mut self, status: OptimizationStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record failed; failures always recommend the fallback asset.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.use_fallback = true;
        self.recommended_version = RecommendedVersion::Fallback;
        self.optimized_path = None;
        self.finish(OptimizationStatus::Failed);
    }

    /// Bytes saved by the optimized output, zero if none.
    pub fn bytes_saved(&self) -> u64 {
        match (self.original_size, self.optimized_size) {
            (Some(original), Some(optimized)) if self.status == OptimizationStatus::Completed => {
                original.saturating_sub(optimized)
            }
            _ => 0,
        }
    }
}

/// Running counters maintained by the optimization engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub fallbacks: u64,
    pub total_bytes_saved: u64,
    /// Incremental mean over successful transcodes
    pub average_compression_ratio: f64,
    /// Incremental mean over successful transcodes
    pub average_processing_time_ms: f64,
}

impl OptimizationStats {
    /// Fold one finished record into the counters.
    pub fn record(&mut self, record: &OptimizationRecord) {
        self.total_processed += 1;

        match record.status {
            OptimizationStatus::Completed if record.strategy == Some(OptimizationStrategy::Fallback) => {
                self.fallbacks += 1;
            }
            OptimizationStatus::Completed => {
                self.successful += 1;
                self.total_bytes_saved += record.bytes_saved();

                let n = self.successful as f64;
                if let Some(ratio) = record.compression_ratio {
                    self.average_compression_ratio += (ratio - self.average_compression_ratio) / n;
                }
                if let Some(ms) = record.processing_time_ms {
                    self.average_processing_time_ms +=
                        (ms as f64 - self.average_processing_time_ms) / n;
                }
            }
            OptimizationStatus::Skipped => self.skipped += 1,
            OptimizationStatus::Failed => {
                self.failed += 1;
                self.fallbacks += 1;
            }
            OptimizationStatus::Pending | OptimizationStatus::Processing => {}
        }
    }
}
