//! Optimization engine: skip, transcode or fall back, once per source URL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use vprep_media::{partial_path, remove_if_exists, MetadataExtractor, TranscodeSettings, Transcoder};
use vprep_models::{
    OptimizationRecord, OptimizationStats, OptimizationStatus, OptimizationStrategy,
    RecommendedVersion, TargetConfig, VideoMetadata,
};

use crate::asset_cache::url_hash;
use crate::config::{HeuristicsConfig, TranscodeDefaults};
use crate::error::WorkerResult;
use crate::extract::extract_metadata;
use crate::logging::StageLogger;
use crate::metrics;
use crate::single_flight::SingleFlight;

/// Constraints for one optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOptions {
    pub target_size_mb: f64,
    pub max_width: u32,
    pub max_height: u32,
    /// Transcode even when the file already meets the targets
    pub force_optimization: bool,
    /// When false, files beyond the fallback limits are transcoded instead
    pub allow_fallback: bool,
    /// Overrides the engine's default transcode timeout
    pub timeout: Option<Duration>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        let target = TargetConfig::default();
        Self {
            target_size_mb: target.max_size_mb,
            max_width: target.max_width,
            max_height: target.max_height,
            force_optimization: false,
            allow_fallback: true,
            timeout: None,
        }
    }
}

impl From<&TargetConfig> for OptimizeOptions {
    fn from(target: &TargetConfig) -> Self {
        Self {
            target_size_mb: target.max_size_mb,
            max_width: target.max_width,
            max_height: target.max_height,
            ..Default::default()
        }
    }
}

/// True when the file is too large or too high-resolution to be worth processing.
pub fn needs_fallback(metadata: &VideoMetadata, heuristics: &HeuristicsConfig) -> bool {
    metadata.size_mb() > heuristics.fallback_size_mb
        || metadata.exceeds_resolution(heuristics.fallback_max_width, heuristics.fallback_max_height)
}

/// Pick the strategy for a file. Pure.
pub fn select_strategy(
    metadata: &VideoMetadata,
    options: &OptimizeOptions,
    heuristics: &HeuristicsConfig,
) -> OptimizationStrategy {
    if options.allow_fallback && needs_fallback(metadata, heuristics) {
        return OptimizationStrategy::Fallback;
    }

    let meets_targets = metadata.size_mb() <= options.target_size_mb
        && !metadata.exceeds_resolution(options.max_width, options.max_height);

    if meets_targets && !options.force_optimization {
        OptimizationStrategy::Skip
    } else {
        OptimizationStrategy::Transcode
    }
}

struct EngineInner {
    output_dir: PathBuf,
    heuristics: HeuristicsConfig,
    defaults: TranscodeDefaults,
    extractor: Arc<dyn MetadataExtractor>,
    transcoder: Arc<dyn Transcoder>,
    records: Mutex<HashMap<String, OptimizationRecord>>,
    stats: Mutex<OptimizationStats>,
}

/// Optimization engine service.
#[derive(Clone)]
pub struct OptimizationEngine {
    inner: Arc<EngineInner>,
    flights: SingleFlight<String, OptimizationRecord>,
}

impl OptimizationEngine {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        heuristics: HeuristicsConfig,
        defaults: TranscodeDefaults,
        extractor: Arc<dyn MetadataExtractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                output_dir: output_dir.into(),
                heuristics,
                defaults,
                extractor,
                transcoder,
                records: Mutex::new(HashMap::new()),
                stats: Mutex::new(OptimizationStats::default()),
            }),
            flights: SingleFlight::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    /// Optimize the local copy of `source_url`.
    ///
    /// Concurrent calls for the same URL share one run. Never fails: errors
    /// become a `Failed` record recommending the fallback asset.
    pub async fn optimize(
        &self,
        source_url: &str,
        local_path: &Path,
        options: OptimizeOptions,
    ) -> OptimizationRecord {
        let inner = Arc::clone(&self.inner);
        let url = source_url.to_string();
        let path = local_path.to_path_buf();

        let flight = self
            .flights
            .run(url_hash(source_url), move || async move { inner.run(url, path, options).await })
            .await;

        match flight.value {
            Ok(record) => record,
            Err(e) => {
                let mut record = OptimizationRecord::new(source_url, local_path);
                record.fail(e.to_string());
                self.inner
                    .records
                    .lock()
                    .await
                    .insert(source_url.to_string(), record.clone());
                record
            }
        }
    }

    /// Latest record for `source_url`.
    pub async fn record(&self, source_url: &str) -> Option<OptimizationRecord> {
        self.inner.records.lock().await.get(source_url).cloned()
    }

    /// Delete the optimized artifact for `source_url` and forget its record.
    ///
    /// Returns whether a file was removed; repeated calls are no-ops.
    pub async fn cleanup(&self, source_url: &str) -> WorkerResult<bool> {
        let record = self.inner.records.lock().await.remove(source_url);
        match record.and_then(|r| r.optimized_path) {
            Some(path) => Ok(remove_if_exists(&path).await?),
            None => Ok(false),
        }
    }

    pub async fn stats(&self) -> OptimizationStats {
        *self.inner.stats.lock().await
    }

    pub async fn reset_stats(&self) {
        *self.inner.stats.lock().await = OptimizationStats::default();
    }
}

impl EngineInner {
    async fn run(&self, url: String, path: PathBuf, options: OptimizeOptions) -> OptimizationRecord {
        let key = url_hash(&url);
        let logger = StageLogger::new(&key, "optimize");
        logger.log_start(&url);

        let mut record = OptimizationRecord::new(&url, &path);
        record.status = OptimizationStatus::Processing;
        self.records.lock().await.insert(url.clone(), record.clone());

        match extract_metadata(self.extractor.as_ref(), &path).await {
            Ok(metadata) => {
                record.original_size = Some(metadata.byte_size);
                record.metadata = Some(metadata.clone());
                self.apply_strategy(&mut record, &metadata, &options, &key, &logger).await;
            }
            Err(e) => {
                logger.log_error(&format!("metadata extraction failed: {}", e));
                record.fail(e.to_string());
            }
        }

        let strategy = record.strategy.map(|s| s.as_str()).unwrap_or("none");
        metrics::record_optimization(strategy, record.status.as_str(), record.processing_time_ms);
        logger.log_completion(&format!(
            "status={} recommended={}",
            record.status.as_str(),
            record.recommended_version.as_str()
        ));

        self.stats.lock().await.record(&record);
        self.records.lock().await.insert(url, record.clone());
        record
    }

    async fn apply_strategy(
        &self,
        record: &mut OptimizationRecord,
        metadata: &VideoMetadata,
        options: &OptimizeOptions,
        key: &str,
        logger: &StageLogger,
    ) {
        let strategy = select_strategy(metadata, options, &self.heuristics);
        record.strategy = Some(strategy);

        match strategy {
            OptimizationStrategy::Fallback => {
                logger.log_warning(&format!(
                    "{:.1}MB at {} is beyond processing limits, recommending fallback",
                    metadata.size_mb(),
                    metadata.resolution_label()
                ));
                record.use_fallback = true;
                record.recommended_version = RecommendedVersion::Fallback;
                record.finish(OptimizationStatus::Completed);
            }
            OptimizationStrategy::Skip => {
                record.recommended_version = RecommendedVersion::Original;
                record.finish(OptimizationStatus::Skipped);
            }
            OptimizationStrategy::Transcode => {
                self.transcode(record, metadata, options, key, logger).await;
            }
        }
    }

    async fn transcode(
        &self,
        record: &mut OptimizationRecord,
        metadata: &VideoMetadata,
        options: &OptimizeOptions,
        key: &str,
        logger: &StageLogger,
    ) {
        let limit = options.timeout.or(self.defaults.timeout);
        let output = self
            .output_dir
            .join(format!("{}-{}.mp4", key, uuid::Uuid::new_v4().simple()));

        let settings = TranscodeSettings {
            target_size_mb: Some(options.target_size_mb),
            max_width: options.max_width,
            max_height: options.max_height,
            crf: self.defaults.crf,
            preset: self.defaults.preset.clone(),
            video_codec: self.defaults.video_codec.clone(),
            audio_codec: self.defaults.audio_codec.clone(),
            audio_bitrate: self.defaults.audio_bitrate.clone(),
            duration_hint_secs: Some(metadata.duration_seconds),
            timeout: limit,
        };

        let started = tokio::time::Instant::now();
        let work = self.transcoder.transcode(&record.original_path, &output, &settings);
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("transcode timed out after {}ms", limit.as_millis())),
            },
            None => work.await.map_err(|e| e.to_string()),
        };
        record.processing_time_ms = Some(started.elapsed().as_millis() as u64);

        match outcome {
            Ok(report) => {
                info!(
                    url_hash = %logger.url_hash(),
                    original_size = report.original_size,
                    optimized_size = report.optimized_size,
                    "Transcode produced optimized asset"
                );
                record.optimized_path = Some(output);
                record.original_size = Some(report.original_size);
                record.optimized_size = Some(report.optimized_size);
                record.compression_ratio = Some(report.compression_ratio());
                record.processing_time_ms = Some(report.processing_time.as_millis() as u64);
                record.recommended_version = RecommendedVersion::Optimized;
                record.finish(OptimizationStatus::Completed);
            }
            Err(message) => {
                logger.log_error(&message);
                for leftover in [output.clone(), partial_path(&output)] {
                    if let Err(e) = remove_if_exists(&leftover).await {
                        warn!(path = %leftover.display(), error = %e, "Failed to remove partial output");
                    }
                }
                record.fail(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeExtractor, FakeTranscoder};
    use tempfile::TempDir;
    use vprep_models::BYTES_PER_MB;

    fn meta(size_mb: f64, width: u32, height: u32) -> VideoMetadata {
        VideoMetadata {
            byte_size: (size_mb * BYTES_PER_MB) as u64,
            duration_seconds: 60.0,
            width,
            height,
            bitrate_kbps: 3000,
            codec: "h264".to_string(),
        }
    }

    fn engine(dir: &TempDir, metadata: VideoMetadata, transcoder: Arc<FakeTranscoder>) -> OptimizationEngine {
        OptimizationEngine::new(
            dir.path().join("optimized"),
            HeuristicsConfig::default(),
            TranscodeDefaults::default(),
            Arc::new(FakeExtractor::new(metadata)),
            transcoder,
        )
    }

    #[test]
    fn test_select_strategy() {
        let h = HeuristicsConfig::default();
        let opts = OptimizeOptions::default();

        assert_eq!(select_strategy(&meta(150.0, 1920, 1080), &opts, &h), OptimizationStrategy::Fallback);
        assert_eq!(select_strategy(&meta(10.0, 3840, 2160), &opts, &h), OptimizationStrategy::Fallback);
        assert_eq!(select_strategy(&meta(10.0, 1280, 720), &opts, &h), OptimizationStrategy::Skip);
        assert_eq!(select_strategy(&meta(70.0, 1280, 720), &opts, &h), OptimizationStrategy::Transcode);
        assert_eq!(select_strategy(&meta(10.0, 2560, 1440), &opts, &h), OptimizationStrategy::Transcode);

        let forced = OptimizeOptions {
            force_optimization: true,
            ..Default::default()
        };
        assert_eq!(select_strategy(&meta(10.0, 1280, 720), &forced, &h), OptimizationStrategy::Transcode);

        let no_fallback = OptimizeOptions {
            allow_fallback: false,
            ..Default::default()
        };
        assert_eq!(select_strategy(&meta(150.0, 1920, 1080), &no_fallback, &h), OptimizationStrategy::Transcode);
        assert_eq!(select_strategy(&meta(10.0, 3840, 2160), &no_fallback, &h), OptimizationStrategy::Transcode);
    }

    #[tokio::test]
    async fn test_skip_does_not_transcode() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(FakeTranscoder::new());
        let engine = engine(&dir, meta(10.0, 1280, 720), transcoder.clone());

        let record = engine
            .optimize("https://cdn/a.mp4", &dir.path().join("a.mp4"), OptimizeOptions::default())
            .await;

        assert_eq!(record.status, OptimizationStatus::Skipped);
        assert_eq!(record.recommended_version, RecommendedVersion::Original);
        assert!(!record.use_fallback);
        assert_eq!(transcoder.calls(), 0);
        assert_eq!(engine.stats().await.skipped, 1);
    }

    #[tokio::test]
    async fn test_fallback_skips_transcode() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(FakeTranscoder::new());
        let engine = engine(&dir, meta(150.0, 1920, 1080), transcoder.clone());

        let record = engine
            .optimize("https://cdn/big.mp4", &dir.path().join("big.mp4"), OptimizeOptions::default())
            .await;

        assert_eq!(record.status, OptimizationStatus::Completed);
        assert!(record.use_fallback);
        assert_eq!(record.recommended_version, RecommendedVersion::Fallback);
        assert_eq!(transcoder.calls(), 0);
        assert_eq!(engine.stats().await.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_disallowed_fallback_transcodes_instead() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("big.mp4");
        tokio::fs::write(&input, vec![0u8; 1000]).await.unwrap();
        let transcoder = Arc::new(FakeTranscoder::new());
        let engine = engine(&dir, meta(150.0, 1920, 1080), transcoder.clone());

        let record = engine
            .optimize(
                "https://cdn/big.mp4",
                &input,
                OptimizeOptions {
                    allow_fallback: false,
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(record.strategy, Some(OptimizationStrategy::Transcode));
        assert_eq!(record.status, OptimizationStatus::Completed);
        assert_eq!(record.recommended_version, RecommendedVersion::Optimized);
        assert!(!record.use_fallback);
        assert_eq!(transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_transcode_success_updates_stats() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, vec![0u8; 1000]).await.unwrap();
        let transcoder = Arc::new(FakeTranscoder::new().with_output_size(250));
        let engine = engine(&dir, meta(70.0, 1280, 720), transcoder.clone());

        let record = engine.optimize("https://cdn/in.mp4", &input, OptimizeOptions::default()).await;

        assert_eq!(record.status, OptimizationStatus::Completed);
        assert_eq!(record.recommended_version, RecommendedVersion::Optimized);
        let output = record.optimized_path.clone().unwrap();
        assert!(output.exists());
        assert_eq!(record.compression_ratio, Some(0.25));

        let stats = engine.stats().await;
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.total_bytes_saved, 750);
        assert!((stats.average_compression_ratio - 0.25).abs() < 1e-9);

        assert!(engine.cleanup("https://cdn/in.mp4").await.unwrap());
        assert!(!output.exists());
        assert!(!engine.cleanup("https://cdn/in.mp4").await.unwrap());
        assert!(engine.record("https://cdn/in.mp4").await.is_none());

        engine.reset_stats().await;
        assert_eq!(engine.stats().await, OptimizationStats::default());
    }

    #[tokio::test]
    async fn test_timeout_fails_and_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, vec![0u8; 100]).await.unwrap();
        let transcoder = Arc::new(FakeTranscoder::new().with_delay(Duration::from_secs(30)));
        let engine = engine(&dir, meta(70.0, 1280, 720), transcoder.clone());

        let record = engine
            .optimize(
                "https://cdn/slow.mp4",
                &input,
                OptimizeOptions {
                    timeout: Some(Duration::from_millis(300)),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(record.status, OptimizationStatus::Failed);
        assert!(record.use_fallback);
        assert_eq!(record.recommended_version, RecommendedVersion::Fallback);
        assert!(record.error.as_deref().unwrap().contains("timed out"));
        assert!(record.optimized_path.is_none());

        // The fake writes a partial file before stalling; nothing may remain.
        let mut leftovers = tokio::fs::read_dir(dir.path().join("optimized")).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
        assert_eq!(engine.stats().await.failed, 1);
    }

    #[tokio::test]
    async fn test_transcode_error_fails() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(FakeTranscoder::new().failing());
        let engine = engine(&dir, meta(70.0, 1280, 720), transcoder);

        let record = engine
            .optimize("https://cdn/x.mp4", &dir.path().join("x.mp4"), OptimizeOptions::default())
            .await;
        assert_eq!(record.status, OptimizationStatus::Failed);
        assert!(record.use_fallback);
    }

    #[tokio::test]
    async fn test_metadata_failure_fails_record() {
        let dir = TempDir::new().unwrap();
        let engine = OptimizationEngine::new(
            dir.path().join("optimized"),
            HeuristicsConfig::default(),
            TranscodeDefaults::default(),
            Arc::new(FakeExtractor::failing()),
            Arc::new(FakeTranscoder::new()),
        );

        let record = engine
            .optimize("https://cdn/bad.mp4", &dir.path().join("bad.mp4"), OptimizeOptions::default())
            .await;
        assert_eq!(record.status, OptimizationStatus::Failed);
        assert!(record.metadata.is_none());
        assert_eq!(engine.record("https://cdn/bad.mp4").await, Some(record));
    }

    #[tokio::test]
    async fn test_concurrent_optimize_runs_once() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, vec![0u8; 1000]).await.unwrap();
        let transcoder = Arc::new(FakeTranscoder::new().with_delay(Duration::from_millis(50)));
        let engine = engine(&dir, meta(70.0, 1280, 720), transcoder.clone());

        let records = futures::future::join_all(
            (0..4).map(|_| engine.optimize("https://cdn/in.mp4", &input, OptimizeOptions::default())),
        )
        .await;

        assert_eq!(transcoder.calls(), 1);
        assert!(records.iter().all(|r| r == &records[0]));
        assert_eq!(engine.stats().await.total_processed, 1);
    }
}
