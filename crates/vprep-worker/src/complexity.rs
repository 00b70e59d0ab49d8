//! Complexity scoring and processing-time estimation.

use vprep_models::{ComplexityProfile, VideoMetadata};

use crate::config::HeuristicsConfig;

const MIN_SCORE: u8 = 1;
const MAX_SCORE: u8 = 10;

const PIXELS_4K: u64 = 3840 * 2160;
const PIXELS_1080P: u64 = 1920 * 1080;
const PIXELS_720P: u64 = 1280 * 720;

fn resolution_weight(metadata: &VideoMetadata) -> u8 {
    match metadata.pixels() {
        p if p >= PIXELS_4K => 4,
        p if p > PIXELS_1080P => 3,
        p if p > PIXELS_720P => 2,
        _ => 1,
    }
}

fn duration_weight(duration_seconds: f64) -> u8 {
    match duration_seconds {
        d if d >= 300.0 => 3,
        d if d >= 120.0 => 2,
        d if d >= 60.0 => 1,
        _ => 0,
    }
}

fn bitrate_weight(bitrate_kbps: u64) -> u8 {
    match bitrate_kbps {
        b if b > 10_000 => 2,
        b if b > 5_000 => 1,
        _ => 0,
    }
}

fn codec_weight(codec: &str) -> u8 {
    match codec.to_ascii_lowercase().as_str() {
        "hevc" | "h265" | "h.265" => 1,
        "av1" | "libaom-av1" | "libdav1d" => 2,
        _ => 0,
    }
}

/// Bounded 1-10 score; non-decreasing in each input dimension.
pub fn complexity_score(metadata: &VideoMetadata) -> u8 {
    let score = MIN_SCORE
        + resolution_weight(metadata)
        + duration_weight(metadata.duration_seconds)
        + bitrate_weight(metadata.bitrate_kbps)
        + codec_weight(&metadata.codec);
    score.clamp(MIN_SCORE, MAX_SCORE)
}

/// Estimated seconds of processing for a video with the given score.
pub fn estimate_processing_seconds(metadata: &VideoMetadata, score: u8, config: &HeuristicsConfig) -> u64 {
    let duration = metadata.duration_seconds;
    if !duration.is_finite() || duration <= 0.0 {
        return 0;
    }

    let mut multiplier = config.base_time_multiplier * (1.0 + score as f64 * config.score_time_factor);

    let size_mb = metadata.size_mb();
    if size_mb > config.large_file_mb {
        multiplier *= config.large_file_multiplier;
    } else if size_mb > config.medium_file_mb {
        multiplier *= config.medium_file_multiplier;
    }

    if metadata.exceeds_1080p() {
        multiplier *= config.high_res_multiplier;
    }

    // Tolerate float noise from the multiplier chain before rounding up.
    (duration * multiplier - 1e-9).ceil().max(0.0) as u64
}

/// Pure profile of `metadata`.
pub fn analyze_complexity(metadata: &VideoMetadata, config: &HeuristicsConfig) -> ComplexityProfile {
    let complexity_score = complexity_score(metadata);
    ComplexityProfile {
        complexity_score,
        estimated_processing_time_seconds: estimate_processing_seconds(metadata, complexity_score, config),
    }
}
