//! Pipeline configuration.
//!
//! Every threshold the decision functions use lives here so the router,
//! engine and orchestrator stay pure over `(input, config)`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_parse::<u64>(name).map(Duration::from_secs).unwrap_or(default)
}

/// Asset cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetCacheConfig {
    /// Directory owned exclusively by the cache
    pub dir: PathBuf,
    /// Upper bound on a single download
    pub fetch_timeout: Duration,
    /// Age after which the janitor evicts settled entries
    pub retention: Duration,
    /// How often the janitor sweeps
    pub sweep_interval: Duration,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/vprep/cache"),
            fetch_timeout: Duration::from_secs(600),
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(900),
        }
    }
}

/// Thresholds for complexity scoring, tier routing and strategy selection.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicsConfig {
    // Processing-time estimate
    pub base_time_multiplier: f64,
    /// Added to the multiplier per complexity point
    pub score_time_factor: f64,
    pub large_file_mb: f64,
    pub large_file_multiplier: f64,
    pub medium_file_mb: f64,
    pub medium_file_multiplier: f64,
    pub high_res_multiplier: f64,

    // Tier3 (cluster)
    pub cluster_size_mb: f64,
    pub cluster_time_secs: u64,
    pub cluster_score: u8,
    pub cluster_duration_secs: f64,
    pub cluster_max_width: u32,
    pub cluster_max_height: u32,

    // Tier2 (enhanced)
    pub enhanced_size_mb: f64,
    pub enhanced_time_secs: u64,
    pub enhanced_score: u8,

    // Preprocessing plan
    pub basic_optimization_size_mb: f64,
    pub basic_optimization_score: u8,
    pub compress_size_mb: f64,
    pub bitrate_limit_kbps: u64,

    // Fallback policy shared by the engine and the orchestrator
    pub fallback_size_mb: f64,
    pub fallback_max_width: u32,
    pub fallback_max_height: u32,

    // Confidences
    pub direct_confidence: u8,
    pub enhanced_confidence: u8,
    pub cluster_size_confidence: u8,
    pub cluster_duration_confidence: u8,
    pub cluster_resolution_confidence: u8,
    pub analysis_failure_confidence: u8,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            base_time_multiplier: 2.0,
            score_time_factor: 0.2,
            large_file_mb: 100.0,
            large_file_multiplier: 1.5,
            medium_file_mb: 50.0,
            medium_file_multiplier: 1.2,
            high_res_multiplier: 1.3,

            cluster_size_mb: 200.0,
            cluster_time_secs: 600,
            cluster_score: 8,
            cluster_duration_secs: 600.0,
            cluster_max_width: 2560,
            cluster_max_height: 1440,

            enhanced_size_mb: 50.0,
            enhanced_time_secs: 120,
            enhanced_score: 5,

            basic_optimization_size_mb: 20.0,
            basic_optimization_score: 4,
            compress_size_mb: 100.0,
            bitrate_limit_kbps: 5000,

            fallback_size_mb: 100.0,
            fallback_max_width: 2560,
            fallback_max_height: 1440,

            direct_confidence: 95,
            enhanced_confidence: 85,
            cluster_size_confidence: 95,
            cluster_duration_confidence: 90,
            cluster_resolution_confidence: 85,
            analysis_failure_confidence: 50,
        }
    }
}

impl HeuristicsConfig {
    /// Create config from environment variables, keeping defaults for the rest.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cluster_size_mb: env_parse("VPREP_CLUSTER_SIZE_MB").unwrap_or(d.cluster_size_mb),
            cluster_time_secs: env_parse("VPREP_CLUSTER_TIME_SECS").unwrap_or(d.cluster_time_secs),
            cluster_duration_secs: env_parse("VPREP_CLUSTER_DURATION_SECS")
                .unwrap_or(d.cluster_duration_secs),
            enhanced_size_mb: env_parse("VPREP_ENHANCED_SIZE_MB").unwrap_or(d.enhanced_size_mb),
            fallback_size_mb: env_parse("VPREP_FALLBACK_SIZE_MB").unwrap_or(d.fallback_size_mb),
            fallback_max_width: env_parse("VPREP_FALLBACK_MAX_WIDTH").unwrap_or(d.fallback_max_width),
            fallback_max_height: env_parse("VPREP_FALLBACK_MAX_HEIGHT")
                .unwrap_or(d.fallback_max_height),
            bitrate_limit_kbps: env_parse("VPREP_BITRATE_LIMIT_KBPS").unwrap_or(d.bitrate_limit_kbps),
            ..d
        }
    }

    fn validate(&self) -> WorkerResult<()> {
        if self.base_time_multiplier <= 0.0 || self.score_time_factor < 0.0 {
            return Err(WorkerError::config_error("time multipliers must be positive"));
        }
        if self.enhanced_size_mb >= self.cluster_size_mb {
            return Err(WorkerError::config_error(format!(
                "enhanced_size_mb ({}) must be below cluster_size_mb ({})",
                self.enhanced_size_mb, self.cluster_size_mb
            )));
        }
        if self.enhanced_time_secs >= self.cluster_time_secs {
            return Err(WorkerError::config_error(
                "enhanced_time_secs must be below cluster_time_secs",
            ));
        }
        if self.fallback_max_width == 0 || self.fallback_max_height == 0 {
            return Err(WorkerError::config_error("fallback resolution must be positive"));
        }
        let confidences = [
            self.direct_confidence,
            self.enhanced_confidence,
            self.cluster_size_confidence,
            self.cluster_duration_confidence,
            self.cluster_resolution_confidence,
            self.analysis_failure_confidence,
        ];
        if confidences.iter().any(|c| *c > 100) {
            return Err(WorkerError::config_error("confidence values must be within 0-100"));
        }
        Ok(())
    }
}

/// Encoder defaults for the optimization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeDefaults {
    pub crf: u8,
    pub preset: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// Applied when a caller passes no timeout
    pub timeout: Option<Duration>,
}

impl Default for TranscodeDefaults {
    fn default() -> Self {
        Self {
            crf: 28,
            preset: "fast".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl TranscodeDefaults {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            crf: env_parse("VPREP_TRANSCODE_CRF").unwrap_or(d.crf),
            preset: std::env::var("VPREP_TRANSCODE_PRESET").unwrap_or(d.preset),
            video_codec: std::env::var("VPREP_TRANSCODE_VIDEO_CODEC").unwrap_or(d.video_codec),
            audio_codec: std::env::var("VPREP_TRANSCODE_AUDIO_CODEC").unwrap_or(d.audio_codec),
            audio_bitrate: std::env::var("VPREP_TRANSCODE_AUDIO_BITRATE").unwrap_or(d.audio_bitrate),
            timeout: match env_parse::<u64>("VPREP_TRANSCODE_TIMEOUT_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => d.timeout,
            },
        }
    }
}

/// Remote job monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Wall-clock ceiling; reaching it means `TimedOut`
    pub timeout: Duration,
    /// Status-query errors are retried until `timeout - query_error_margin`
    pub query_error_margin: Duration,
    pub submit_retries: u32,
    pub submit_base_delay: Duration,
    /// Progress once the cluster accepts the job
    pub starting_progress: u8,
    /// Progress when the job starts running
    pub running_progress: u8,
    /// Highest progress reported before a terminal state
    pub running_progress_cap: u8,
    /// Running time over which progress ramps from `running_progress` to the cap
    pub expected_running: Duration,
    /// Consecutive query failures logged before suppression
    pub max_logged_query_errors: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
            query_error_margin: Duration::from_secs(60),
            submit_retries: 3,
            submit_base_delay: Duration::from_secs(1),
            starting_progress: 10,
            running_progress: 25,
            running_progress_cap: 95,
            expected_running: Duration::from_secs(10 * 60),
            max_logged_query_errors: 3,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: env_secs("VPREP_MONITOR_POLL_SECS", d.poll_interval),
            timeout: env_secs("VPREP_MONITOR_TIMEOUT_SECS", d.timeout),
            query_error_margin: env_secs("VPREP_MONITOR_QUERY_MARGIN_SECS", d.query_error_margin),
            submit_retries: env_parse("VPREP_MONITOR_SUBMIT_RETRIES").unwrap_or(d.submit_retries),
            expected_running: env_secs("VPREP_MONITOR_EXPECTED_RUNNING_SECS", d.expected_running),
            ..d
        }
    }

    fn validate(&self) -> WorkerResult<()> {
        if self.poll_interval.is_zero() {
            return Err(WorkerError::config_error("poll_interval must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(WorkerError::config_error("monitor timeout must be positive"));
        }
        if self.query_error_margin >= self.timeout {
            return Err(WorkerError::config_error(format!(
                "query_error_margin ({:?}) must be below the timeout ({:?})",
                self.query_error_margin, self.timeout
            )));
        }
        if !(self.starting_progress <= self.running_progress
            && self.running_progress <= self.running_progress_cap
            && self.running_progress_cap < 100)
        {
            return Err(WorkerError::config_error(
                "progress must satisfy starting <= running <= cap < 100",
            ));
        }
        Ok(())
    }
}

/// Root configuration, owned by the composition root.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Scratch root; the optimization engine writes under `optimized/`
    pub work_dir: PathBuf,
    pub cache: AssetCacheConfig,
    pub heuristics: HeuristicsConfig,
    pub transcode: TranscodeDefaults,
    pub monitor: MonitorConfig,
    /// Frame rate used when a request does not carry one
    pub default_fps: u32,
    /// Default chunk size for batch preprocessing
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vprep"),
            cache: AssetCacheConfig::default(),
            heuristics: HeuristicsConfig::default(),
            transcode: TranscodeDefaults::default(),
            monitor: MonitorConfig::default(),
            default_fps: 30,
            batch_concurrency: 3,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (after loading `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let work_dir = std::env::var("VPREP_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/vprep"));

        let cache_defaults = AssetCacheConfig::default();
        let cache = AssetCacheConfig {
            dir: std::env::var("VPREP_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| work_dir.join("cache")),
            fetch_timeout: env_secs("VPREP_FETCH_TIMEOUT_SECS", cache_defaults.fetch_timeout),
            retention: env_secs("VPREP_CACHE_RETENTION_SECS", cache_defaults.retention),
            sweep_interval: env_secs("VPREP_CACHE_SWEEP_SECS", cache_defaults.sweep_interval),
        };

        Self {
            cache,
            heuristics: HeuristicsConfig::from_env(),
            transcode: TranscodeDefaults::from_env(),
            monitor: MonitorConfig::from_env(),
            default_fps: env_parse("VPREP_DEFAULT_FPS").unwrap_or(30),
            batch_concurrency: env_parse("VPREP_BATCH_CONCURRENCY").unwrap_or(3),
            work_dir,
        }
    }

    /// Directory owned by the optimization engine.
    pub fn optimized_dir(&self) -> PathBuf {
        self.work_dir.join("optimized")
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.default_fps == 0 {
            return Err(WorkerError::config_error("default_fps must be positive"));
        }
        if self.batch_concurrency == 0 {
            return Err(WorkerError::config_error("batch_concurrency must be positive"));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(WorkerError::config_error("cache sweep_interval must be positive"));
        }
        if self.transcode.crf > 51 {
            return Err(WorkerError::config_error(format!(
                "crf {} out of range 0-51",
                self.transcode.crf
            )));
        }
        self.heuristics.validate()?;
        self.monitor.validate()
    }
}
