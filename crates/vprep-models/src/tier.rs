//! Processing tiers and routing decisions.
//!
//! Three tiers trade capacity for start-up latency:
//!
//! - `Direct`: render straight from the source on the fast path
//! - `Enhanced`: download, cache and preprocess first, then render directly
//! - `Cluster`: hand the job to the compute cluster and poll it

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Processing tier selected by the tier router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum ProcessingTier {
    /// Tier 1: direct rendering, no preprocessing beyond optional basic optimization.
    #[serde(rename = "tier1_direct")]
    Direct,

    /// Tier 2: preprocessing pipeline followed by direct rendering.
    #[serde(rename = "tier2_enhanced")]
    Enhanced,

    /// Tier 3: compute cluster execution with progress polling.
    #[serde(rename = "tier3_cluster")]
    Cluster,
}

impl ProcessingTier {
    /// All tiers, lightest first.
    pub const ALL: &'static [ProcessingTier] = &[
        ProcessingTier::Direct,
        ProcessingTier::Enhanced,
        ProcessingTier::Cluster,
    ];

    /// Returns the tier name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingTier::Direct => "tier1_direct",
            ProcessingTier::Enhanced => "tier2_enhanced",
            ProcessingTier::Cluster => "tier3_cluster",
        }
    }

    /// Returns a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingTier::Direct => "Direct rendering for small, simple videos",
            ProcessingTier::Enhanced => "Preprocessed rendering for medium videos",
            ProcessingTier::Cluster => "Cluster rendering for large or complex videos",
        }
    }

    /// The tier to try when this one cannot handle the job.
    pub fn fallback(&self) -> Option<ProcessingTier> {
        match self {
            ProcessingTier::Direct => Some(ProcessingTier::Enhanced),
            ProcessingTier::Enhanced => Some(ProcessingTier::Cluster),
            ProcessingTier::Cluster => None,
        }
    }

    /// Returns true if jobs on this tier go through the remote job monitor.
    pub fn uses_cluster(&self) -> bool {
        matches!(self, ProcessingTier::Cluster)
    }
}

impl fmt::Display for ProcessingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingTier {
    type Err = ProcessingTierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tier1_direct" | "tier1" | "direct" => Ok(ProcessingTier::Direct),
            "tier2_enhanced" | "tier2" | "enhanced" => Ok(ProcessingTier::Enhanced),
            "tier3_cluster" | "tier3" | "cluster" => Ok(ProcessingTier::Cluster),
            _ => Err(ProcessingTierParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown processing tier: {0}")]
pub struct ProcessingTierParseError(String);

/// Derived cost estimate for one video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComplexityProfile {
    /// Bounded heuristic in [1, 10]
    pub complexity_score: u8,
    /// Estimated processing time in whole seconds
    pub estimated_processing_time_seconds: u64,
}

/// A single preprocessing action recommended by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessingStep {
    /// Fetch the source into the local asset cache
    DownloadAndCache,
    /// Re-encode to shrink the file
    Compress,
    /// Scale down to 1080p
    Resize,
    /// Cap the video bitrate
    ReduceBitrate,
    /// Light re-encode for mid-sized Tier 1 inputs
    BasicOptimization,
}

impl PreprocessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreprocessingStep::DownloadAndCache => "download_and_cache",
            PreprocessingStep::Compress => "compress",
            PreprocessingStep::Resize => "resize",
            PreprocessingStep::ReduceBitrate => "reduce_bitrate",
            PreprocessingStep::BasicOptimization => "basic_optimization",
        }
    }
}

impl fmt::Display for PreprocessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered preprocessing actions for a routed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PreprocessingPlan {
    pub steps: Vec<PreprocessingStep>,
}

impl PreprocessingPlan {
    /// Plan with no steps.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if any preprocessing has to happen before rendering.
    pub fn is_required(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn contains(&self, step: PreprocessingStep) -> bool {
        self.steps.contains(&step)
    }
}

/// Result of one routing analysis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecision {
    pub profile: ComplexityProfile,
    pub tier: ProcessingTier,
    /// Confidence in the decision, 0-100
    pub confidence: u8,
    /// Human-readable reasons, in the order the rules fired
    pub reasoning: Vec<String>,
    pub fallback_tier: Option<ProcessingTier>,
    pub preprocessing_plan: PreprocessingPlan,
}

impl RoutingDecision {
    /// Returns true if the job must be handed to the remote job monitor.
    pub fn requires_cluster(&self) -> bool {
        self.tier.uses_cluster()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!("tier1".parse::<ProcessingTier>().unwrap(), ProcessingTier::Direct);
        assert_eq!("Enhanced".parse::<ProcessingTier>().unwrap(), ProcessingTier::Enhanced);
        assert_eq!("tier3_cluster".parse::<ProcessingTier>().unwrap(), ProcessingTier::Cluster);
        assert!("tier4".parse::<ProcessingTier>().is_err());
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(ProcessingTier::Direct.fallback(), Some(ProcessingTier::Enhanced));
        assert_eq!(ProcessingTier::Enhanced.fallback(), Some(ProcessingTier::Cluster));
        assert_eq!(ProcessingTier::Cluster.fallback(), None);
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&ProcessingTier::Cluster).unwrap();
        assert_eq!(json, "\"tier3_cluster\"");
        for tier in ProcessingTier::ALL {
            assert_eq!(tier.to_string().parse::<ProcessingTier>().unwrap(), *tier);
        }
    }

    #[test]
    fn test_plan_required() {
        assert!(!PreprocessingPlan::none().is_required());
        let plan = PreprocessingPlan {
            steps: vec![PreprocessingStep::DownloadAndCache],
        };
        assert!(plan.is_required());
        assert!(plan.contains(PreprocessingStep::DownloadAndCache));
        assert!(!plan.contains(PreprocessingStep::Resize));
    }
}
