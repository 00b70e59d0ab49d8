//! Preprocessing requests, results and pipeline statistics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Duration assumed for a video whose metadata could not be read.
pub const FALLBACK_DURATION_SECONDS: u32 = 30;

/// Output constraints for a preprocessed asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct TargetConfig {
    /// Maximum file size in megabytes
    #[validate(range(exclusive_min = 0.0))]
    pub max_size_mb: f64,
    #[validate(range(min = 1))]
    pub max_width: u32,
    #[validate(range(min = 1))]
    pub max_height: u32,
    /// Render frame rate used for `duration_in_frames`; the pipeline's
    /// default applies when unset
    #[validate(range(min = 1, max = 240))]
    pub target_fps: Option<u32>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 50.0,
            max_width: 1920,
            max_height: 1080,
            target_fps: None,
        }
    }
}

impl TargetConfig {
    /// Requested frame rate, or `default_fps` when none was given.
    pub fn fps_or(&self, default_fps: u32) -> u32 {
        self.target_fps.unwrap_or(default_fps)
    }
}

/// Scheduling priority of a request inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Per-request behaviour switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Transcode even when the asset already satisfies the target
    pub force_optimization: bool,
    /// Upper bound on the transcode step
    pub timeout_ms: Option<u64>,
    pub priority: Priority,
    /// Allow substituting a fallback visual for unusable assets
    pub enable_fallback: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            force_optimization: false,
            timeout_ms: Some(300_000),
            priority: Priority::Normal,
            enable_fallback: true,
        }
    }
}

/// One preprocessing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct PreprocessRequest {
    #[validate(url)]
    pub video_url: String,
    #[serde(default)]
    #[validate(nested)]
    pub target_config: TargetConfig,
    #[serde(default)]
    pub options: PreprocessOptions,
}

impl PreprocessRequest {
    /// Request with default target and options.
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            target_config: TargetConfig::default(),
            options: PreprocessOptions::default(),
        }
    }

    pub fn with_target(mut self, target_config: TargetConfig) -> Self {
        self.target_config = target_config;
        self
    }

    pub fn with_options(mut self, options: PreprocessOptions) -> Self {
        self.options = options;
        self
    }
}

/// Timing and size figures for one preprocessing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingStats {
    pub download_time_ms: u64,
    pub optimization_time_ms: u64,
    pub total_time_ms: u64,
    pub original_size: u64,
    pub final_size: u64,
    /// final / original, 1.0 when nothing changed
    pub compression_ratio: f64,
}

/// Final, caller-facing outcome of preprocessing one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PreprocessingResult {
    pub original_url: String,
    /// URL the renderer should load
    pub final_video_url: String,
    pub is_optimized: bool,
    pub use_fallback: bool,
    pub duration_in_frames: u32,
    /// Renderer should not wait on loading the video
    pub should_skip_loading: bool,
    pub processing_stats: ProcessingStats,
    pub success: bool,
    pub error: Option<String>,
}

impl PreprocessingResult {
    /// Failure result: the renderer gets the original URL, a default
    /// duration and is told not to load the video.
    pub fn failure(
        original_url: impl Into<String>,
        target_fps: u32,
        use_fallback: bool,
        error: impl Into<String>,
    ) -> Self {
        let original_url = original_url.into();
        Self {
            final_video_url: original_url.clone(),
            original_url,
            is_optimized: false,
            use_fallback,
            duration_in_frames: FALLBACK_DURATION_SECONDS.saturating_mul(target_fps),
            should_skip_loading: true,
            processing_stats: ProcessingStats::default(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Bytes saved relative to the original asset.
    pub fn bytes_saved(&self) -> u64 {
        if !self.is_optimized {
            return 0;
        }
        self.processing_stats
            .original_size
            .saturating_sub(self.processing_stats.final_size)
    }
}

/// Aggregate counters for the preprocessing pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub optimized: u64,
    pub fallbacks: u64,
    /// Incremental mean over successful runs
    pub average_total_time_ms: f64,
    pub total_bytes_saved: u64,
}

impl PipelineStats {
    /// Fold one finished result into the counters.
    pub fn record(&mut self, result: &PreprocessingResult) {
        self.total_processed += 1;

        if result.use_fallback {
            self.fallbacks += 1;
        }

        if !result.success {
            self.failed += 1;
            return;
        }

        self.successful += 1;
        let n = self.successful as f64;
        self.average_total_time_ms +=
            (result.processing_stats.total_time_ms as f64 - self.average_total_time_ms) / n;

        if result.is_optimized {
            self.optimized += 1;
            self.total_bytes_saved += result.bytes_saved();
        }
    }
}
