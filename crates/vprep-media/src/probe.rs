//! FFprobe metadata extraction.
//!
//! Two strategies are exposed so the caller can choose:
//! - `extract_quick`: small probe window, format-level fields only, short timeout
//! - `extract_full`: large probe window, stream-level fallbacks for missing fields
//!
//! Neither retries internally.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use vprep_models::VideoMetadata;

use crate::error::{MediaError, MediaResult};

/// Structural metadata extraction from a local file.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Cheap extraction; may fail on files a full probe can read.
    async fn extract_quick(&self, path: &Path) -> MediaResult<VideoMetadata>;

    /// Thorough extraction.
    async fn extract_full(&self, path: &Path) -> MediaResult<VideoMetadata>;
}

/// FFprobe-backed extractor.
#[derive(Debug, Clone)]
pub struct FfprobeExtractor {
    quick_timeout: Duration,
    full_timeout: Duration,
}

impl Default for FfprobeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FfprobeExtractor {
    pub fn new() -> Self {
        Self {
            quick_timeout: Duration::from_secs(10),
            full_timeout: Duration::from_secs(60),
        }
    }

    /// Set per-strategy timeouts.
    pub fn with_timeouts(mut self, quick: Duration, full: Duration) -> Self {
        self.quick_timeout = quick;
        self.full_timeout = full;
        self
    }

    async fn run_ffprobe(&self, path: &Path, args: &[&str], timeout: Duration) -> MediaResult<Vec<u8>> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

        let mut command = Command::new("ffprobe");
        command
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| MediaError::metadata(path, format!("ffprobe timed out after {:?}", timeout)))??;

        if !output.status.success() {
            return Err(MediaError::metadata(
                path,
                format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MetadataExtractor for FfprobeExtractor {
    async fn extract_quick(&self, path: &Path) -> MediaResult<VideoMetadata> {
        debug!(path = %path.display(), "Quick metadata extraction");
        let stdout = self
            .run_ffprobe(
                path,
                &[
                    "-v",
                    "error",
                    "-probesize",
                    "5M",
                    "-analyzeduration",
                    "5M",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "format=duration,size,bit_rate:stream=codec_type,codec_name,width,height",
                    "-of",
                    "json",
                ],
                self.quick_timeout,
            )
            .await?;

        let file_size = file_len(path).await;
        parse_probe_output(path, &stdout, file_size, ProbeMode::Quick)
    }

    async fn extract_full(&self, path: &Path) -> MediaResult<VideoMetadata> {
        debug!(path = %path.display(), "Full metadata extraction");
        let stdout = self
            .run_ffprobe(
                path,
                &[
                    "-v",
                    "error",
                    "-probesize",
                    "100M",
                    "-analyzeduration",
                    "100M",
                    "-show_format",
                    "-show_streams",
                    "-of",
                    "json",
                ],
                self.full_timeout,
            )
            .await?;

        let file_size = file_len(path).await;
        parse_probe_output(path, &stdout, file_size, ProbeMode::Full)
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// How forgiving parsing is about missing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeMode {
    /// Format-level duration is mandatory.
    Quick,
    /// Falls back to stream duration and derived bitrate.
    Full,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_probe_output(
    path: &Path,
    stdout: &[u8],
    file_size: Option<u64>,
    mode: ProbeMode,
) -> MediaResult<VideoMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::metadata(path, format!("unparseable ffprobe output: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::metadata(path, "no video stream found"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::metadata(path, "video stream has no dimensions")),
    };

    let format = probe.format.as_ref();

    let mut duration: Option<f64> = format
        .and_then(|f| parse_number(f.duration.as_ref()))
        .filter(|d: &f64| d.is_finite() && *d > 0.0);
    if duration.is_none() && mode == ProbeMode::Full {
        duration = parse_number(video.duration.as_ref()).filter(|d: &f64| d.is_finite() && *d > 0.0);
    }
    let duration = duration.ok_or_else(|| MediaError::metadata(path, "duration unavailable"))?;

    let byte_size = format
        .and_then(|f| parse_number::<u64>(f.size.as_ref()))
        .or(file_size)
        .unwrap_or(0);

    let mut bitrate_bps: Option<u64> = format.and_then(|f| parse_number(f.bit_rate.as_ref()));
    if bitrate_bps.is_none() && mode == ProbeMode::Full {
        bitrate_bps = parse_number(video.bit_rate.as_ref())
            .or_else(|| (byte_size > 0).then(|| (byte_size as f64 * 8.0 / duration) as u64));
    }

    Ok(VideoMetadata {
        byte_size,
        duration_seconds: duration,
        width,
        height,
        bitrate_kbps: bitrate_bps.unwrap_or(0) / 1000,
        codec: video.codec_name.clone().unwrap_or_default().to_lowercase(),
    })
}
