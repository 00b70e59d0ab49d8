//! Shared data models for the video preprocessing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video metadata and complexity profiles
//! - Processing tiers and routing decisions
//! - Asset cache entries and optimization records
//! - Preprocessing requests, results and statistics
//! - Remote job state and progress events

pub mod cache;
pub mod metadata;
pub mod optimization;
pub mod preprocess;
pub mod remote_job;
pub mod tier;

// Re-export common types
pub use cache::{CacheEntry, CacheStats, CacheStatus};
pub use metadata::{duration_in_frames, VideoMetadata, BYTES_PER_MB};
pub use optimization::{
    OptimizationRecord, OptimizationStats, OptimizationStatus, OptimizationStrategy,
    RecommendedVersion,
};
pub use preprocess::{
    PipelineStats, PreprocessOptions, PreprocessRequest, PreprocessingResult, Priority,
    ProcessingStats, TargetConfig, FALLBACK_DURATION_SECONDS,
};
pub use remote_job::{
    JobHandle, RemoteJobEvent, RemoteJobFailure, RemoteJobReport, RemoteJobState,
};
pub use tier::{
    ComplexityProfile, PreprocessingPlan, PreprocessingStep, ProcessingTier, RoutingDecision,
};
