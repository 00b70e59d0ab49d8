//! FFmpeg/FFprobe CLI wrappers for the preprocessing pipeline.
//!
//! This crate provides:
//! - Metadata extraction with quick and full strategies
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cancellation that terminate the encoder process
//! - Constraint-driven transcoding

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{file_size, partial_path, remove_if_exists};
pub use probe::{FfprobeExtractor, MetadataExtractor};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use transcode::{FfmpegTranscoder, TranscodeReport, TranscodeSettings, Transcoder};
