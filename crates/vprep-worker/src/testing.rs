//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use vprep_cluster::{ClusterError, ClusterResult, ComputeCluster, JobStatusReport, RenderJobSpec};
use vprep_media::{partial_path, MediaError, MediaResult, MetadataExtractor, TranscodeReport, TranscodeSettings, Transcoder};
use vprep_models::{JobHandle, VideoMetadata, BYTES_PER_MB};
use vprep_storage::{ObjectFetcher, StorageError, StorageResult};

/// 10MB, 20s, 720p H.264.
pub(crate) fn sample_metadata() -> VideoMetadata {
    VideoMetadata {
        byte_size: (10.0 * BYTES_PER_MB) as u64,
        duration_seconds: 20.0,
        width: 1280,
        height: 720,
        bitrate_kbps: 4000,
        codec: "h264".to_string(),
    }
}

/// Writes `size` zero bytes to the destination, staging them in a `.part` sibling first.
pub(crate) struct FakeFetcher {
    size: usize,
    delay: Option<Duration>,
    fail_first: u32,
    calls: AtomicU32,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    locators: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            delay: None,
            fail_first: 0,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            peak_in_flight: AtomicU32::new(0),
            locators: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub(crate) fn failing() -> Self {
        Self::new(0).failing_first(u32::MAX)
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches observed running at once.
    pub(crate) fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Locators in fetch order.
    pub(crate) fn locators(&self) -> Vec<String> {
        self.locators.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectFetcher for FakeFetcher {
    fn supports(&self, _locator: &str) -> bool {
        true
    }

    async fn fetch_to_file(&self, locator: &str, dest: &Path) -> StorageResult<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.locators.lock().unwrap().push(locator.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged = partial_path(dest);
        tokio::fs::write(&staged, vec![0u8; self.size]).await?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if call <= self.fail_first {
            tokio::fs::remove_file(&staged).await?;
            return Err(StorageError::download_failed(format!("{}: connection reset", locator)));
        }
        tokio::fs::rename(&staged, dest).await?;
        Ok(self.size as u64)
    }
}

/// Returns fixed metadata, or fails every probe.
pub(crate) struct FakeExtractor {
    metadata: Option<VideoMetadata>,
    panic_first: u32,
    calls: AtomicU32,
}

impl FakeExtractor {
    pub(crate) fn new(metadata: VideoMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            panic_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            metadata: None,
            panic_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    /// Panic on the first `n` probes.
    pub(crate) fn panicking_first(mut self, n: u32) -> Self {
        self.panic_first = n;
        self
    }

    fn result(&self, path: &Path) -> MediaResult<VideoMetadata> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.panic_first {
            panic!("decoder crashed on {}", path.display());
        }
        self.metadata
            .clone()
            .ok_or_else(|| MediaError::metadata(path, "moov atom not found"))
    }
}

#[async_trait]
impl MetadataExtractor for FakeExtractor {
    async fn extract_quick(&self, path: &Path) -> MediaResult<VideoMetadata> {
        self.result(path)
    }

    async fn extract_full(&self, path: &Path) -> MediaResult<VideoMetadata> {
        self.result(path)
    }
}

/// Writes a partial file, waits, then produces `output_size` bytes.
pub(crate) struct FakeTranscoder {
    output_size: usize,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicU32,
}

impl FakeTranscoder {
    pub(crate) fn new() -> Self {
        Self {
            output_size: 100,
            delay: None,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn with_output_size(mut self, size: usize) -> Self {
        self.output_size = size;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _settings: &TranscodeSettings,
    ) -> MediaResult<TranscodeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = std::time::Instant::now();

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(output);
        tokio::fs::write(&partial, b"partial").await?;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail {
            tokio::fs::remove_file(&partial).await?;
            return Err(MediaError::ffmpeg_failed("encoder exited", None, Some(1)));
        }

        tokio::fs::write(output, vec![0u8; self.output_size]).await?;
        tokio::fs::remove_file(&partial).await?;

        let original_size = tokio::fs::metadata(input).await.map(|m| m.len()).unwrap_or(0);
        Ok(TranscodeReport {
            original_size,
            optimized_size: self.output_size as u64,
            processing_time: started.elapsed(),
        })
    }
}

/// One scripted reply to a status query.
#[derive(Debug, Clone)]
pub(crate) enum StatusStep {
    Report(JobStatusReport),
    /// HTTP error with this status code
    Error(u16),
    /// Never answers
    Hang,
}

/// Cluster with scripted submit and status behaviour.
///
/// Once the status script runs out, the last step repeats.
pub(crate) struct FakeCluster {
    submit_errors: Mutex<VecDeque<u16>>,
    submit_hangs: bool,
    statuses: Mutex<VecDeque<StatusStep>>,
    last: Mutex<Option<StatusStep>>,
    submits: AtomicU32,
    polls: AtomicU32,
}

impl FakeCluster {
    pub(crate) fn new(statuses: Vec<StatusStep>) -> Self {
        Self {
            submit_errors: Mutex::new(VecDeque::new()),
            submit_hangs: false,
            statuses: Mutex::new(statuses.into()),
            last: Mutex::new(None),
            submits: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        }
    }

    /// Fail submissions with these status codes before accepting.
    pub(crate) fn with_submit_errors(self, codes: Vec<u16>) -> Self {
        *self.submit_errors.lock().unwrap() = codes.into();
        self
    }

    /// Submissions never complete.
    pub(crate) fn hanging_submit(mut self) -> Self {
        self.submit_hangs = true;
        self
    }

    pub(crate) fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeCluster for FakeCluster {
    async fn submit_job(&self, spec: &RenderJobSpec) -> ClusterResult<JobHandle> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.submit_hangs {
            std::future::pending::<()>().await;
        }
        if let Some(code) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(ClusterError::http(code, "submit refused"));
        }
        Ok(JobHandle::new(format!("job-{}", spec.name)))
    }

    async fn get_job_status(&self, _job: &JobHandle) -> ClusterResult<JobStatusReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let next = self.statuses.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            match next {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last.clone().unwrap_or(StatusStep::Error(500)),
            }
        };
        match step {
            StatusStep::Report(report) => Ok(report),
            StatusStep::Error(code) => Err(ClusterError::http(code, "status query failed")),
            StatusStep::Hang => std::future::pending().await,
        }
    }
}
