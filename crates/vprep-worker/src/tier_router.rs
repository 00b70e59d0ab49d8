//! Processing-tier routing.
//!
//! Rules are evaluated top-down and the first match wins:
//!
//! 1. Cluster if size, estimated time or complexity is over the cluster limits
//! 2. Cluster if the video is longer than the duration limit
//! 3. Cluster if the resolution is above the cluster resolution
//! 4. Enhanced if size, estimated time or complexity is in the enhanced range
//! 5. Direct otherwise
//!
//! When metadata cannot be extracted at all the router answers with a
//! conservative cluster decision instead of guessing.

use std::path::Path;

use tracing::{info, warn};
use vprep_media::MetadataExtractor;
use vprep_models::{
    ComplexityProfile, PreprocessingPlan, PreprocessingStep, ProcessingTier, RoutingDecision,
    VideoMetadata,
};

use crate::complexity::analyze_complexity;
use crate::config::HeuristicsConfig;
use crate::extract::extract_metadata;
use crate::metrics;

/// Score reported when analysis failed.
pub const ANALYSIS_FAILURE_SCORE: u8 = 10;
/// Processing-time estimate reported when analysis failed.
pub const ANALYSIS_FAILURE_SECONDS: u64 = 900;

#[derive(Debug, Clone, Default)]
pub struct TierRouter {
    config: HeuristicsConfig,
}

impl TierRouter {
    pub fn new(config: HeuristicsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeuristicsConfig {
        &self.config
    }

    /// Route already-extracted metadata. Pure.
    pub fn route(&self, metadata: &VideoMetadata, profile: &ComplexityProfile) -> RoutingDecision {
        let (tier, confidence, reasoning) = self.select_tier(metadata, profile);
        RoutingDecision {
            profile: *profile,
            tier,
            confidence,
            reasoning,
            fallback_tier: tier.fallback(),
            preprocessing_plan: self.plan(tier, metadata, profile),
        }
    }

    /// Profile and route metadata.
    pub fn decide(&self, metadata: &VideoMetadata) -> RoutingDecision {
        let profile = analyze_complexity(metadata, &self.config);
        let decision = self.route(metadata, &profile);
        metrics::record_routing(decision.tier.as_str());
        info!(
            tier = decision.tier.as_str(),
            confidence = decision.confidence,
            complexity_score = profile.complexity_score,
            estimated_secs = profile.estimated_processing_time_seconds,
            "Routing decision"
        );
        decision
    }

    /// Extract metadata from a local file and route it.
    pub async fn analyze(&self, extractor: &dyn MetadataExtractor, path: &Path) -> RoutingDecision {
        match extract_metadata(extractor, path).await {
            Ok(metadata) => self.decide(&metadata),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Analysis failed, routing to cluster");
                self.analysis_failure(&e.to_string())
            }
        }
    }

    /// Conservative decision used when the video could not be analyzed.
    pub fn analysis_failure(&self, reason: &str) -> RoutingDecision {
        let tier = ProcessingTier::Cluster;
        metrics::record_routing(tier.as_str());
        RoutingDecision {
            profile: ComplexityProfile {
                complexity_score: ANALYSIS_FAILURE_SCORE,
                estimated_processing_time_seconds: ANALYSIS_FAILURE_SECONDS,
            },
            tier,
            confidence: self.config.analysis_failure_confidence,
            reasoning: vec![
                format!("Video analysis failed: {}", reason),
                "Routing to cluster processing as a safe default".to_string(),
            ],
            fallback_tier: tier.fallback(),
            preprocessing_plan: PreprocessingPlan {
                steps: vec![PreprocessingStep::DownloadAndCache],
            },
        }
    }

    fn select_tier(
        &self,
        metadata: &VideoMetadata,
        profile: &ComplexityProfile,
    ) -> (ProcessingTier, u8, Vec<String>) {
        let c = &self.config;
        let size_mb = metadata.size_mb();
        let est = profile.estimated_processing_time_seconds;
        let score = profile.complexity_score;

        let mut reasons = Vec::new();
        if size_mb > c.cluster_size_mb {
            reasons.push(format!(
                "File size {:.1}MB exceeds Lambda limits ({}MB)",
                size_mb, c.cluster_size_mb
            ));
        }
        if est > c.cluster_time_secs {
            reasons.push(format!(
                "Estimated processing time {}s exceeds {}s limit",
                est, c.cluster_time_secs
            ));
        }
        if score >= c.cluster_score {
            reasons.push(format!(
                "Complexity score {} requires cluster resources (>= {})",
                score, c.cluster_score
            ));
        }
        if !reasons.is_empty() {
            return (ProcessingTier::Cluster, c.cluster_size_confidence, reasons);
        }

        if metadata.duration_seconds > c.cluster_duration_secs {
            return (
                ProcessingTier::Cluster,
                c.cluster_duration_confidence,
                vec![format!(
                    "Duration {:.0}s exceeds {:.0}s direct render limit",
                    metadata.duration_seconds, c.cluster_duration_secs
                )],
            );
        }

        if metadata.width > c.cluster_max_width || metadata.height > c.cluster_max_height {
            return (
                ProcessingTier::Cluster,
                c.cluster_resolution_confidence,
                vec![format!(
                    "Resolution {} exceeds {}x{}",
                    metadata.resolution_label(),
                    c.cluster_max_width,
                    c.cluster_max_height
                )],
            );
        }

        if size_mb > c.enhanced_size_mb {
            reasons.push(format!(
                "File size {:.1}MB within enhanced range ({}-{}MB)",
                size_mb, c.enhanced_size_mb, c.cluster_size_mb
            ));
        }
        if est > c.enhanced_time_secs {
            reasons.push(format!(
                "Estimated processing time {}s within enhanced range ({}-{}s)",
                est, c.enhanced_time_secs, c.cluster_time_secs
            ));
        }
        if score >= c.enhanced_score {
            reasons.push(format!(
                "Complexity score {} needs enhanced processing (>= {})",
                score, c.enhanced_score
            ));
        }
        if !reasons.is_empty() {
            return (ProcessingTier::Enhanced, c.enhanced_confidence, reasons);
        }

        (
            ProcessingTier::Direct,
            c.direct_confidence,
            vec![format!(
                "File size {:.1}MB, duration {:.0}s and complexity {} fit direct rendering",
                size_mb, metadata.duration_seconds, score
            )],
        )
    }

    fn plan(
        &self,
        tier: ProcessingTier,
        metadata: &VideoMetadata,
        profile: &ComplexityProfile,
    ) -> PreprocessingPlan {
        let c = &self.config;
        let size_mb = metadata.size_mb();
        let mut steps = Vec::new();

        match tier {
            ProcessingTier::Direct => {
                if size_mb > c.basic_optimization_size_mb
                    || profile.complexity_score >= c.basic_optimization_score
                {
                    steps.push(PreprocessingStep::BasicOptimization);
                }
            }
            ProcessingTier::Enhanced | ProcessingTier::Cluster => {
                steps.push(PreprocessingStep::DownloadAndCache);
                if size_mb > c.compress_size_mb {
                    steps.push(PreprocessingStep::Compress);
                }
                if metadata.exceeds_1080p() {
                    steps.push(PreprocessingStep::Resize);
                }
                if metadata.bitrate_kbps > c.bitrate_limit_kbps {
                    steps.push(PreprocessingStep::ReduceBitrate);
                }
            }
        }

        PreprocessingPlan { steps }
    }
}
