//! Transcoding to fit size and resolution constraints.

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use vprep_models::BYTES_PER_MB;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_parent_dir, file_size, partial_path, remove_if_exists};
use crate::progress::tracing_callback;

/// Lowest video bitrate the size-driven cap will request.
const MIN_VIDEO_KBPS: u64 = 250;

/// Encoder settings for one transcode.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSettings {
    /// Desired upper bound on output size; converted into a bitrate cap
    /// when `duration_hint_secs` is known
    pub target_size_mb: Option<f64>,
    pub max_width: u32,
    pub max_height: u32,
    pub crf: u8,
    pub preset: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub duration_hint_secs: Option<f64>,
    /// Kill the encoder after this long
    pub timeout: Option<Duration>,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            target_size_mb: None,
            max_width: 1920,
            max_height: 1080,
            crf: 28,
            preset: "fast".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            duration_hint_secs: None,
            timeout: None,
        }
    }
}

impl TranscodeSettings {
    /// Reject settings no encoder can honour.
    pub fn validate(&self) -> MediaResult<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(MediaError::InvalidSettings(format!(
                "max resolution must be positive, got {}x{}",
                self.max_width, self.max_height
            )));
        }
        if self.crf > 51 {
            return Err(MediaError::InvalidSettings(format!("crf {} out of range 0-51", self.crf)));
        }
        if let Some(mb) = self.target_size_mb {
            if !(mb.is_finite() && mb > 0.0) {
                return Err(MediaError::InvalidSettings(format!("target size {} MB", mb)));
            }
        }
        Ok(())
    }

    /// Audio bitrate in kbps, parsed from strings like "128k".
    fn audio_kbps(&self) -> u64 {
        let raw = self.audio_bitrate.trim().trim_end_matches(['k', 'K']);
        raw.parse().unwrap_or(128)
    }

    /// Video bitrate cap that keeps the output under `target_size_mb`.
    pub fn max_video_kbps(&self) -> Option<u64> {
        let target_mb = self.target_size_mb?;
        let duration = self.duration_hint_secs.filter(|d| d.is_finite() && *d > 0.0)?;
        let total_kbps = (target_mb * BYTES_PER_MB * 8.0 / 1000.0 / duration) as u64;
        Some(total_kbps.saturating_sub(self.audio_kbps()).max(MIN_VIDEO_KBPS))
    }

    /// Downscale-only filter preserving aspect ratio with even dimensions.
    pub fn scale_filter(&self) -> String {
        format!(
            "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease,scale=trunc(iw/2)*2:trunc(ih/2)*2",
            w = self.max_width,
            h = self.max_height
        )
    }

    /// Build the FFmpeg command for these settings.
    pub fn to_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output)
            .video_filter(self.scale_filter())
            .video_codec(&self.video_codec)
            .crf(self.crf)
            .preset(&self.preset)
            .audio_codec(&self.audio_codec)
            .audio_bitrate(&self.audio_bitrate);

        if let Some(kbps) = self.max_video_kbps() {
            cmd = cmd.max_video_bitrate(kbps);
        }

        cmd.output_args(["-pix_fmt", "yuv420p"]).faststart()
    }

    /// Command that encodes into the `.part` sibling of `output`.
    ///
    /// The staging name hides the extension from FFmpeg, so the container
    /// is forced from `output`'s extension.
    pub fn to_staged_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        self.to_command(input, &partial_path(output)).format(muxer_for(output))
    }
}

/// FFmpeg muxer name for an output path.
fn muxer_for(output: &Path) -> &'static str {
    match output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mov") => "mov",
        Some("mkv") => "matroska",
        Some("webm") => "webm",
        _ => "mp4",
    }
}

/// Sizes and timing of a finished transcode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeReport {
    pub original_size: u64,
    pub optimized_size: u64,
    pub processing_time: Duration,
}

impl TranscodeReport {
    /// optimized / original.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.optimized_size as f64 / self.original_size as f64
    }
}

/// Re-encodes a local file into `output`.
///
/// Implementations must leave no partial file at `output` (or its `.part`
/// sibling) on error.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &TranscodeSettings,
    ) -> MediaResult<TranscodeReport>;
}

/// FFmpeg CLI transcoder.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &TranscodeSettings,
    ) -> MediaResult<TranscodeReport> {
        settings.validate()?;

        let original_size = file_size(input)
            .await
            .map_err(|_| MediaError::FileNotFound(input.to_path_buf()))?;
        ensure_parent_dir(output).await?;

        let started = Instant::now();
        let staged = partial_path(output);
        let cmd = settings.to_staged_command(input, output);
        let total_ms = settings
            .duration_hint_secs
            .map(|d| (d * 1000.0) as i64)
            .unwrap_or_default();

        debug!(
            input = %input.display(),
            output = %output.display(),
            max_kbps = ?settings.max_video_kbps(),
            "Starting transcode"
        );

        let run = FfmpegRunner::new()
            .with_timeout(settings.timeout)
            .run_with_progress(&cmd, tracing_callback(output.display().to_string(), total_ms))
            .await;

        let run = match run {
            Ok(()) => tokio::fs::rename(&staged, output).await.map_err(MediaError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = run {
            warn!(output = %output.display(), error = %e, "Transcode failed, removing partial output");
            if let Err(cleanup) = remove_if_exists(&staged).await {
                warn!(error = %cleanup, "Failed to remove partial transcode output");
            }
            return Err(e);
        }

        let optimized_size = file_size(output).await?;
        let report = TranscodeReport {
            original_size,
            optimized_size,
            processing_time: started.elapsed(),
        };

        info!(
            output = %output.display(),
            original_size,
            optimized_size,
            ratio = report.compression_ratio(),
            elapsed_ms = report.processing_time.as_millis() as u64,
            "Transcode complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_video_kbps_from_target() {
        let settings = TranscodeSettings {
            target_size_mb: Some(10.0),
            duration_hint_secs: Some(60.0),
            ..Default::default()
        };
        // 10 MiB * 8 / 1000 / 60 = 1398 kbps total, minus 128 kbps audio
        assert_eq!(settings.max_video_kbps(), Some(1270));
    }

    #[test]
    fn test_max_video_kbps_floor_and_missing_hint() {
        let tiny = TranscodeSettings {
            target_size_mb: Some(0.5),
            duration_hint_secs: Some(600.0),
            ..Default::default()
        };
        assert_eq!(tiny.max_video_kbps(), Some(MIN_VIDEO_KBPS));

        let no_hint = TranscodeSettings {
            target_size_mb: Some(10.0),
            ..Default::default()
        };
        assert_eq!(no_hint.max_video_kbps(), None);
    }

    #[test]
    fn test_command_contains_scale_and_codec() {
        let settings = TranscodeSettings {
            max_width: 1280,
            max_height: 720,
            ..Default::default()
        };
        let args = settings
            .to_command(Path::new("in.mp4"), Path::new("out.mp4"))
            .build_args();
        assert!(args.iter().any(|a| a.contains("min(1280,iw)") && a.contains("min(720,ih)")));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "fast"]));
        assert!(!args.iter().any(|a| a == "-maxrate"));
    }

    #[test]
    fn test_staged_command_writes_part_file() {
        let args = TranscodeSettings::default()
            .to_staged_command(Path::new("in.mp4"), Path::new("/tmp/out/x.mp4"))
            .build_args();
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out/x.mp4.part"));
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));

        let mkv = TranscodeSettings::default()
            .to_staged_command(Path::new("in.mp4"), Path::new("x.MKV"))
            .build_args();
        assert!(mkv.windows(2).any(|w| w == ["-f", "matroska"]));
    }

    #[test]
    fn test_validate() {
        assert!(TranscodeSettings::default().validate().is_ok());
        let bad = TranscodeSettings {
            max_width: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(MediaError::InvalidSettings(_))));
        let bad_crf = TranscodeSettings {
            crf: 60,
            ..Default::default()
        };
        assert!(bad_crf.validate().is_err());
    }

    #[test]
    fn test_compression_ratio() {
        let report = TranscodeReport {
            original_size: 200,
            optimized_size: 50,
            processing_time: Duration::from_secs(1),
        };
        assert!((report.compression_ratio() - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = FfmpegTranscoder::new()
            .transcode(
                &dir.path().join("missing.mp4"),
                &dir.path().join("out.mp4"),
                &TranscodeSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
