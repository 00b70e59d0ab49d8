//! Structural video metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bytes per megabyte used by every size threshold in the pipeline.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Structural metadata of a local video file.
///
/// Produced once by the metadata extractor and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// File size in bytes
    pub byte_size: u64,
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Overall bitrate in kilobits/second
    pub bitrate_kbps: u64,
    /// Video codec name as reported by the prober (e.g. "h264", "hevc")
    pub codec: String,
}

impl VideoMetadata {
    /// File size in megabytes.
    pub fn size_mb(&self) -> f64 {
        self.byte_size as f64 / BYTES_PER_MB
    }

    /// Total pixel count of one frame.
    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True if either dimension exceeds the given bounds.
    pub fn exceeds_resolution(&self, max_width: u32, max_height: u32) -> bool {
        self.width > max_width || self.height > max_height
    }

    /// True if either dimension exceeds 1920x1080.
    pub fn exceeds_1080p(&self) -> bool {
        self.exceeds_resolution(1920, 1080)
    }

    /// Number of frames at `fps`, rounded to the nearest frame.
    pub fn duration_in_frames(&self, fps: u32) -> u32 {
        duration_in_frames(self.duration_seconds, fps)
    }

    /// Human-readable resolution, e.g. "1920x1080".
    pub fn resolution_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// `round(duration * fps)`, saturating at zero for negative or NaN durations.
pub fn duration_in_frames(duration_seconds: f64, fps: u32) -> u32 {
    let frames = (duration_seconds * f64::from(fps)).round();
    if frames.is_finite() && frames > 0.0 {
        frames.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}
