//! Preprocessing orchestrator.
//!
//! Composes the asset cache, metadata extraction, strategy selection and the
//! optimization engine into one per-URL pipeline:
//!
//! ```text
//! fetch -> extract (quick, then full) -> strategy -> optimize? -> frames
//! ```
//!
//! Every outcome, including invalid requests and fetch failures, comes back
//! as a [`PreprocessingResult`].

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};
use validator::Validate;
use vprep_media::{FfmpegTranscoder, FfprobeExtractor, MetadataExtractor, Transcoder};
use vprep_models::{
    OptimizationStatus, OptimizationStrategy, PipelineStats, PreprocessOptions, PreprocessRequest,
    PreprocessingResult, ProcessingStats, RoutingDecision, TargetConfig, VideoMetadata,
};
use vprep_storage::{HttpFetcher, HttpFetcherConfig, ObjectFetcher, ObjectStore, R2Client, R2Config};

use crate::asset_cache::{file_url, url_hash, AssetCache, CacheOptions};
use crate::config::{HeuristicsConfig, PipelineConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::extract::extract_metadata;
use crate::logging::StageLogger;
use crate::metrics;
use crate::optimization::{needs_fallback, OptimizationEngine, OptimizeOptions};
use crate::single_flight::SingleFlight;
use crate::tier_router::TierRouter;

/// Strategy for one request, parameterized by its target.
///
/// `Transcode` is chosen when the file exceeds any target dimension, runs
/// above the bitrate limit, or optimization is forced. A fallback becomes
/// `Transcode` when the request disables fallbacks, and the engine is told
/// the same through [`OptimizeOptions::allow_fallback`].
pub fn select_preprocess_strategy(
    metadata: &VideoMetadata,
    request: &PreprocessRequest,
    heuristics: &HeuristicsConfig,
) -> OptimizationStrategy {
    let target = &request.target_config;

    if needs_fallback(metadata, heuristics) {
        return if request.options.enable_fallback {
            OptimizationStrategy::Fallback
        } else {
            OptimizationStrategy::Transcode
        };
    }

    let over_target = metadata.size_mb() > target.max_size_mb
        || metadata.exceeds_resolution(target.max_width, target.max_height)
        || metadata.bitrate_kbps > heuristics.bitrate_limit_kbps;

    if over_target || request.options.force_optimization {
        OptimizationStrategy::Transcode
    } else {
        OptimizationStrategy::Skip
    }
}

fn compression_ratio(original: u64, final_size: u64) -> f64 {
    if original == 0 {
        1.0
    } else {
        final_size as f64 / original as f64
    }
}

struct PreprocessorInner {
    heuristics: HeuristicsConfig,
    default_fps: u32,
    cache: AssetCache,
    engine: OptimizationEngine,
    extractor: Arc<dyn MetadataExtractor>,
    router: TierRouter,
    stats: Mutex<PipelineStats>,
}

/// Preprocessing service; cheap to clone.
#[derive(Clone)]
pub struct Preprocessor {
    inner: Arc<PreprocessorInner>,
    batch_concurrency: usize,
    flights: SingleFlight<String, PreprocessingResult>,
}

impl Preprocessor {
    /// Build the pipeline from its collaborators.
    pub fn new(
        config: &PipelineConfig,
        fetcher: Arc<dyn ObjectFetcher>,
        extractor: Arc<dyn MetadataExtractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let cache = AssetCache::new(config.cache.clone(), fetcher);
        let engine = OptimizationEngine::new(
            config.optimized_dir(),
            config.heuristics.clone(),
            config.transcode.clone(),
            Arc::clone(&extractor),
            transcoder,
        );

        Self {
            inner: Arc::new(PreprocessorInner {
                heuristics: config.heuristics.clone(),
                default_fps: config.default_fps,
                router: TierRouter::new(config.heuristics.clone()),
                cache,
                engine,
                extractor,
                stats: Mutex::new(PipelineStats::default()),
            }),
            batch_concurrency: config.batch_concurrency,
            flights: SingleFlight::new(),
        }
    }

    /// Build the pipeline with ffprobe, ffmpeg and an HTTP(S) fetcher.
    ///
    /// `r2://` and `s3://` locators are served when `VPREP_R2_*` is set.
    pub async fn from_config(config: &PipelineConfig) -> WorkerResult<Self> {
        config.validate()?;

        let mut store = ObjectStore::new().with_fetcher(Arc::new(HttpFetcher::new(HttpFetcherConfig::from_env())?));
        match R2Config::from_env() {
            Ok(r2) => {
                store = store.with_fetcher(Arc::new(R2Client::new(r2).await?));
            }
            Err(e) => info!(reason = %e, "Object storage fetcher disabled"),
        }

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(FfprobeExtractor::new()),
            Arc::new(FfmpegTranscoder::new()),
        ))
    }

    pub fn cache(&self) -> &AssetCache {
        &self.inner.cache
    }

    pub fn engine(&self) -> &OptimizationEngine {
        &self.inner.engine
    }

    pub fn router(&self) -> &TierRouter {
        &self.inner.router
    }

    /// Preprocess one video. Concurrent calls for the same URL share one run.
    pub async fn preprocess(&self, request: PreprocessRequest) -> PreprocessingResult {
        self.run_request(request, true).await
    }

    /// Preprocess `requests` in chunks of `concurrency`.
    ///
    /// Higher-priority requests are scheduled first; results come back in
    /// input order. A failed item never aborts the batch. Batch runs do not
    /// update pipeline statistics.
    pub async fn batch_preprocess(
        &self,
        requests: Vec<PreprocessRequest>,
        concurrency: usize,
    ) -> WorkerResult<Vec<PreprocessingResult>> {
        if concurrency == 0 {
            return Err(WorkerError::config_error("batch concurrency must be positive"));
        }

        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| Reverse(requests[i].options.priority));

        info!(requests = requests.len(), concurrency, "Starting batch preprocessing");

        // Each item's pipeline runs on its own single-flight task, which turns
        // a panic into a failed result for that item only.
        let mut results: Vec<Option<PreprocessingResult>> = vec![None; requests.len()];
        for chunk in order.chunks(concurrency) {
            let settled =
                futures::future::join_all(chunk.iter().map(|&i| self.run_request(requests[i].clone(), false)))
                    .await;
            for (&i, result) in chunk.iter().zip(settled) {
                results[i] = Some(result);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// [`batch_preprocess`](Self::batch_preprocess) with the configured chunk size.
    pub async fn batch_preprocess_default(
        &self,
        requests: Vec<PreprocessRequest>,
    ) -> WorkerResult<Vec<PreprocessingResult>> {
        self.batch_preprocess(requests, self.batch_concurrency).await
    }

    /// Fetch `url` and decide which tier should render it.
    pub async fn plan_render(&self, url: &str) -> RoutingDecision {
        let entry = self.inner.cache.get(url, CacheOptions::default()).await;
        if !entry.is_ready() {
            let reason = entry.error_message.unwrap_or_else(|| "fetch failed".to_string());
            return self.inner.router.analysis_failure(&format!("fetch failed: {}", reason));
        }
        self.inner
            .router
            .analyze(self.inner.extractor.as_ref(), &entry.local_path)
            .await
    }

    pub async fn stats(&self) -> PipelineStats {
        *self.inner.stats.lock().await
    }

    pub async fn reset_stats(&self) {
        *self.inner.stats.lock().await = PipelineStats::default();
    }

    async fn run_request(&self, request: PreprocessRequest, record_stats: bool) -> PreprocessingResult {
        let started = Instant::now();

        let result = if let Err(e) = request.validate() {
            let fps = self.inner.fps_for(&request).max(1);
            PreprocessingResult::failure(
                &request.video_url,
                fps,
                request.options.enable_fallback,
                WorkerError::invalid_request(e.to_string()).to_string(),
            )
        } else {
            let inner = Arc::clone(&self.inner);
            let key = url_hash(&request.video_url);
            let url = request.video_url.clone();
            let fps = inner.fps_for(&request);
            let enable_fallback = request.options.enable_fallback;

            let flight = self
                .flights
                .run(key, move || async move { inner.run(request).await })
                .await;
            flight.value.unwrap_or_else(|e| {
                warn!(url = %url, error = %e, "Preprocessing task aborted");
                PreprocessingResult::failure(
                    &url,
                    fps,
                    enable_fallback,
                    WorkerError::TaskAborted(e.to_string()).to_string(),
                )
            })
        };

        let outcome = if !result.success {
            "failure"
        } else if result.use_fallback {
            "fallback"
        } else {
            "success"
        };
        metrics::record_pipeline(outcome, started.elapsed().as_millis() as u64);

        if record_stats {
            self.inner.stats.lock().await.record(&result);
        }
        result
    }
}

impl PreprocessorInner {
    fn fps_for(&self, request: &PreprocessRequest) -> u32 {
        request.target_config.fps_or(self.default_fps)
    }

    async fn run(&self, request: PreprocessRequest) -> PreprocessingResult {
        let logger = StageLogger::new(&url_hash(&request.video_url), "preprocess");
        let span = logger.span();
        self.pipeline(request, &logger).instrument(span).await
    }

    async fn pipeline(&self, request: PreprocessRequest, logger: &StageLogger) -> PreprocessingResult {
        let started = Instant::now();
        let url = request.video_url.as_str();
        let target = &request.target_config;
        let fps = self.fps_for(&request);
        let enable_fallback = request.options.enable_fallback;
        logger.log_start(url);

        let entry = self.cache.get(url, CacheOptions::default()).await;
        let download_time_ms = started.elapsed().as_millis() as u64;

        if !entry.is_ready() {
            let error = entry.error_message.unwrap_or_else(|| "asset fetch failed".to_string());
            logger.log_error(&format!("fetch failed: {}", error));
            let mut result = PreprocessingResult::failure(url, fps, enable_fallback, error);
            result.processing_stats.download_time_ms = download_time_ms;
            result.processing_stats.total_time_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let metadata = match extract_metadata(self.extractor.as_ref(), &entry.local_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                logger.log_error(&format!("metadata extraction failed: {}", e));
                let mut result =
                    PreprocessingResult::failure(url, fps, enable_fallback, e.to_string());
                result.processing_stats.download_time_ms = download_time_ms;
                result.processing_stats.original_size = entry.byte_size.unwrap_or(0);
                result.processing_stats.final_size = result.processing_stats.original_size;
                result.processing_stats.compression_ratio = 1.0;
                result.processing_stats.total_time_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        let strategy = select_preprocess_strategy(&metadata, &request, &self.heuristics);
        logger.log_progress(&format!(
            "strategy={} size={:.1}MB resolution={} bitrate={}kbps",
            strategy,
            metadata.size_mb(),
            metadata.resolution_label(),
            metadata.bitrate_kbps
        ));

        let mut final_video_url = entry.local_url.clone();
        let mut final_size = metadata.byte_size;
        let mut is_optimized = false;
        let mut optimization_time_ms = 0;
        let mut use_fallback = strategy == OptimizationStrategy::Fallback;

        if strategy == OptimizationStrategy::Transcode {
            let optimize_started = Instant::now();
            let record = self
                .engine
                .optimize(url, &entry.local_path, optimize_options(target, &request.options))
                .await;
            optimization_time_ms = optimize_started.elapsed().as_millis() as u64;

            match (&record.status, &record.optimized_path) {
                (OptimizationStatus::Completed, Some(path)) => {
                    final_video_url = file_url(path);
                    final_size = record.optimized_size.unwrap_or(final_size);
                    is_optimized = true;
                }
                _ => {
                    logger.log_warning(&format!(
                        "optimization ended {} ({}), using cached original",
                        record.status,
                        record.error.as_deref().unwrap_or("no output")
                    ));
                    use_fallback = enable_fallback && record.use_fallback;
                }
            }
        }

        let result = PreprocessingResult {
            original_url: url.to_string(),
            final_video_url,
            is_optimized,
            use_fallback,
            duration_in_frames: metadata.duration_in_frames(fps),
            should_skip_loading: use_fallback,
            processing_stats: ProcessingStats {
                download_time_ms,
                optimization_time_ms,
                total_time_ms: started.elapsed().as_millis() as u64,
                original_size: metadata.byte_size,
                final_size,
                compression_ratio: compression_ratio(metadata.byte_size, final_size),
            },
            success: true,
            error: None,
        };

        logger.log_completion(&format!(
            "optimized={} fallback={} frames={} total_ms={}",
            result.is_optimized,
            result.use_fallback,
            result.duration_in_frames,
            result.processing_stats.total_time_ms
        ));
        result
    }
}

/// Engine options for a request the orchestrator already decided to transcode.
fn optimize_options(target: &TargetConfig, options: &PreprocessOptions) -> OptimizeOptions {
    OptimizeOptions {
        force_optimization: true,
        allow_fallback: options.enable_fallback,
        timeout: options.timeout_ms.map(Duration::from_millis),
        ..OptimizeOptions::from(target)
    }
}
