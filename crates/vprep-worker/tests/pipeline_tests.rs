//! End-to-end pipeline tests over real HTTP collaborators (wiremock).

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use vprep_cluster::{ClusterClientConfig, HttpClusterClient, RenderJobSpec};
use vprep_media::{MediaResult, MetadataExtractor, TranscodeReport, TranscodeSettings, Transcoder};
use vprep_models::{
    PreprocessOptions, PreprocessRequest, Priority, ProcessingTier, RemoteJobState, VideoMetadata,
    BYTES_PER_MB,
};
use vprep_storage::{HttpFetcher, HttpFetcherConfig, ObjectStore};
use vprep_worker::{MonitorConfig, PipelineConfig, Preprocessor, RemoteJobMonitor};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StaticExtractor(VideoMetadata);

#[async_trait]
impl MetadataExtractor for StaticExtractor {
    async fn extract_quick(&self, _path: &Path) -> MediaResult<VideoMetadata> {
        Ok(self.0.clone())
    }

    async fn extract_full(&self, _path: &Path) -> MediaResult<VideoMetadata> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct CopyTranscoder {
    calls: AtomicU32,
}

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _settings: &TranscodeSettings,
    ) -> MediaResult<TranscodeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = tokio::fs::read(input).await?;
        tokio::fs::create_dir_all(output.parent().unwrap()).await?;
        tokio::fs::write(output, &bytes[..bytes.len() / 2]).await?;
        Ok(TranscodeReport {
            original_size: bytes.len() as u64,
            optimized_size: (bytes.len() / 2) as u64,
            processing_time: Duration::from_millis(5),
        })
    }
}

fn metadata(size_mb: f64, duration: f64, width: u32, height: u32) -> VideoMetadata {
    VideoMetadata {
        byte_size: (size_mb * BYTES_PER_MB) as u64,
        duration_seconds: duration,
        width,
        height,
        bitrate_kbps: 3500,
        codec: "h264".to_string(),
    }
}

fn preprocessor(dir: &TempDir, meta: VideoMetadata, transcoder: Arc<CopyTranscoder>) -> Preprocessor {
    let mut config = PipelineConfig {
        work_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    config.cache.dir = dir.path().join("cache");

    let store = ObjectStore::new().with_fetcher(Arc::new(HttpFetcher::new(HttpFetcherConfig::default()).unwrap()));
    Preprocessor::new(&config, Arc::new(store), Arc::new(StaticExtractor(meta)), transcoder)
}

async fn serve_video(server: &MockServer, route: &str, size: usize, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; size]))
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_requests_download_once() {
    let server = MockServer::start().await;
    serve_video(&server, "/videos/a.mp4", 4096, 1).await;

    let dir = TempDir::new().unwrap();
    let transcoder = Arc::new(CopyTranscoder::default());
    let pipeline = preprocessor(&dir, metadata(10.0, 10.0, 1280, 720), transcoder.clone());
    let url = format!("{}/videos/a.mp4", server.uri());

    let results =
        futures::future::join_all((0..3).map(|_| pipeline.preprocess(PreprocessRequest::new(url.clone())))).await;

    for result in &results {
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result, &results[0]);
    }
    assert_eq!(results[0].duration_in_frames, 300);
    assert!(!results[0].is_optimized);
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);

    let cache_stats = pipeline.cache().stats().await;
    assert_eq!(cache_stats.ready_entries, 1);
    assert_eq!(cache_stats.bytes_on_disk, 4096);
}

#[tokio::test]
async fn oversized_video_is_transcoded_from_the_downloaded_copy() {
    let server = MockServer::start().await;
    serve_video(&server, "/videos/big.mp4", 8192, 1).await;

    let dir = TempDir::new().unwrap();
    let transcoder = Arc::new(CopyTranscoder::default());
    let pipeline = preprocessor(&dir, metadata(75.0, 12.0, 1920, 1080), transcoder.clone());
    let url = format!("{}/videos/big.mp4", server.uri());

    let result = pipeline.preprocess(PreprocessRequest::new(url.clone())).await;

    assert!(result.success);
    assert!(result.is_optimized);
    assert_eq!(result.processing_stats.final_size, 4096);
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);

    let record = pipeline.engine().record(&url).await.unwrap();
    let optimized = record.optimized_path.unwrap();
    assert!(optimized.exists());

    assert!(pipeline.engine().cleanup(&url).await.unwrap());
    assert!(!optimized.exists());
    assert!(!pipeline.engine().cleanup(&url).await.unwrap());
}

#[tokio::test]
async fn missing_video_yields_fallback_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videos/gone.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = preprocessor(&dir, metadata(10.0, 10.0, 1280, 720), Arc::new(CopyTranscoder::default()));
    let url = format!("{}/videos/gone.mp4", server.uri());

    let result = pipeline.preprocess(PreprocessRequest::new(url.clone())).await;

    assert!(!result.success);
    assert!(result.should_skip_loading);
    assert_eq!(result.duration_in_frames, 900);
    assert_eq!(result.final_video_url, url);
    assert!(result.error.is_some());

    let stats = pipeline.stats().await;
    assert_eq!((stats.total_processed, stats.failed), (1, 1));
}

#[tokio::test]
async fn batch_isolates_failures() {
    let server = MockServer::start().await;
    serve_video(&server, "/videos/one.mp4", 1024, 1).await;
    serve_video(&server, "/videos/two.mp4", 1024, 1).await;
    Mock::given(method("GET"))
        .and(path("/videos/broken.mp4"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = preprocessor(&dir, metadata(10.0, 10.0, 1280, 720), Arc::new(CopyTranscoder::default()));
    let urls = ["one", "broken", "two"].map(|name| format!("{}/videos/{}.mp4", server.uri(), name));

    let requests = urls
        .iter()
        .map(|url| {
            PreprocessRequest::new(url.clone()).with_options(PreprocessOptions {
                priority: Priority::High,
                ..Default::default()
            })
        })
        .collect();

    let results = pipeline.batch_preprocess(requests, 2).await.unwrap();

    assert_eq!(results.len(), 3);
    for (result, url) in results.iter().zip(&urls) {
        assert_eq!(&result.original_url, url);
    }
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[2].success);
}

#[tokio::test]
async fn heavy_video_is_routed_and_rendered_on_the_cluster() {
    let server = MockServer::start().await;
    serve_video(&server, "/videos/long.mp4", 2048, 1).await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "job_id": "j-42" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/j-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lifecycle_state": "STOPPED",
            "exit_code": 0,
            "result_locator": "s3://renders/j-42.mp4"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let pipeline = preprocessor(&dir, metadata(250.0, 60.0, 1920, 1080), Arc::new(CopyTranscoder::default()));
    let url = format!("{}/videos/long.mp4", server.uri());

    let decision = pipeline.plan_render(&url).await;
    assert_eq!(decision.tier, ProcessingTier::Cluster);
    assert_eq!(decision.confidence, 95);

    let cluster = HttpClusterClient::new(ClusterClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        api_token: None,
    })
    .unwrap();
    let monitor = RemoteJobMonitor::new(
        Arc::new(cluster),
        MonitorConfig {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(10),
            query_error_margin: Duration::from_secs(1),
            ..Default::default()
        },
    );

    let (tx, mut rx) = mpsc::channel(32);
    let spec = RenderJobSpec::new("long", url, 1800, 30);
    let report = monitor.run(&spec, Some(tx)).await;

    assert!(report.is_success(), "{:?}", report.error());
    assert_eq!(report.state, RemoteJobState::Succeeded);
    assert_eq!(report.result_locator.as_deref(), Some("s3://renders/j-42.mp4"));

    let mut last = 0;
    while let Some(event) = rx.recv().await {
        assert!(event.progress >= last);
        last = event.progress;
    }
    assert_eq!(last, 100);
}
