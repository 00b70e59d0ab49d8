//! Pipeline metrics.
//!
//! Recording is fire-and-forget through the `metrics` facade; the embedding
//! service decides whether and how to export.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Asset cache lookups by outcome (hit, miss, coalesced).
    pub const CACHE_LOOKUPS_TOTAL: &str = "vprep_cache_lookups_total";

    /// Failed asset fetches.
    pub const CACHE_FETCH_FAILURES_TOTAL: &str = "vprep_cache_fetch_failures_total";

    /// Bytes downloaded into the cache.
    pub const CACHE_FETCHED_BYTES_TOTAL: &str = "vprep_cache_fetched_bytes_total";

    /// Optimization outcomes by strategy and status.
    pub const OPTIMIZATIONS_TOTAL: &str = "vprep_optimizations_total";

    /// Transcode duration in seconds.
    pub const TRANSCODE_SECONDS: &str = "vprep_transcode_seconds";

    /// Preprocessing runs by outcome.
    pub const PIPELINE_RUNS_TOTAL: &str = "vprep_pipeline_runs_total";

    /// Preprocessing duration in seconds.
    pub const PIPELINE_SECONDS: &str = "vprep_pipeline_seconds";

    /// Routing decisions by tier.
    pub const ROUTING_DECISIONS_TOTAL: &str = "vprep_routing_decisions_total";

    /// Remote jobs by terminal state.
    pub const REMOTE_JOBS_TOTAL: &str = "vprep_remote_jobs_total";

    /// Failed remote status queries.
    pub const REMOTE_POLL_ERRORS_TOTAL: &str = "vprep_remote_poll_errors_total";
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cache_fetch(bytes: Option<u64>) {
    match bytes {
        Some(bytes) => counter!(names::CACHE_FETCHED_BYTES_TOTAL).increment(bytes),
        None => counter!(names::CACHE_FETCH_FAILURES_TOTAL).increment(1),
    }
}

pub fn record_optimization(strategy: &'static str, status: &'static str, transcode_ms: Option<u64>) {
    counter!(
        names::OPTIMIZATIONS_TOTAL,
        "strategy" => strategy,
        "status" => status
    )
    .increment(1);

    if let Some(ms) = transcode_ms {
        histogram!(names::TRANSCODE_SECONDS).record(ms as f64 / 1000.0);
    }
}

pub fn record_pipeline(outcome: &'static str, total_ms: u64) {
    counter!(names::PIPELINE_RUNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::PIPELINE_SECONDS, "outcome" => outcome).record(total_ms as f64 / 1000.0);
}

pub fn record_routing(tier: &'static str) {
    counter!(names::ROUTING_DECISIONS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_remote_job(state: &'static str) {
    counter!(names::REMOTE_JOBS_TOTAL, "state" => state).increment(1);
}

pub fn record_remote_poll_error() {
    counter!(names::REMOTE_POLL_ERRORS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::CACHE_LOOKUPS_TOTAL.starts_with("vprep_"));
        assert!(names::PIPELINE_SECONDS.ends_with("_seconds"));
        assert!(names::REMOTE_POLL_ERRORS_TOTAL.contains("poll"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_lookup("hit");
        record_cache_fetch(Some(10));
        record_cache_fetch(None);
        record_optimization("transcode", "completed", Some(1500));
        record_pipeline("success", 20);
        record_routing("tier1_direct");
        record_remote_job("succeeded");
        record_remote_poll_error();
    }
}
