//! Adaptive video preprocessing and tiered render routing.
//!
//! This crate provides:
//! - Asset cache with per-URL single-flight downloads
//! - Complexity scoring and tier routing
//! - Optimization engine (skip, transcode or fall back)
//! - Preprocessing orchestrator with batch execution
//! - Remote job monitor for cluster-tier renders
//! - Scratch janitor, configuration, logging and metrics

pub mod asset_cache;
pub mod complexity;
pub mod config;
pub mod error;
pub mod extract;
pub mod janitor;
pub mod logging;
pub mod metrics;
pub mod optimization;
pub mod orchestrator;
pub mod remote_job;
pub mod retry;
pub mod single_flight;
pub mod tier_router;

#[cfg(test)]
pub(crate) mod testing;

pub use asset_cache::{url_hash, AssetCache, CacheOptions};
pub use complexity::{analyze_complexity, complexity_score, estimate_processing_seconds};
pub use config::{AssetCacheConfig, HeuristicsConfig, MonitorConfig, PipelineConfig, TranscodeDefaults};
pub use error::{WorkerError, WorkerResult};
pub use extract::extract_metadata;
pub use janitor::{JanitorHandle, ScratchJanitor};
pub use logging::{init_tracing, StageLogger};
pub use optimization::{select_strategy, OptimizationEngine, OptimizeOptions};
pub use orchestrator::{select_preprocess_strategy, Preprocessor};
pub use remote_job::{running_progress, RemoteJobMonitor};
pub use single_flight::{FlightError, FlightResult, SingleFlight};
pub use tier_router::TierRouter;
