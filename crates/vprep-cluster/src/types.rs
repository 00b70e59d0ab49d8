//! Cluster request/response types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vprep_models::{JobHandle, ProcessingTier};

/// Render job submitted to the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJobSpec {
    /// Human-readable job name
    pub name: String,
    /// Ready-to-use input video URL
    pub video_url: String,
    pub duration_in_frames: u32,
    pub fps: u32,
    /// Tier that routed this job here
    pub tier: ProcessingTier,
    /// Extra environment passed to the render container
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

impl RenderJobSpec {
    pub fn new(name: impl Into<String>, video_url: impl Into<String>, duration_in_frames: u32, fps: u32) -> Self {
        Self {
            name: name.into(),
            video_url: video_url.into(),
            duration_in_frames,
            fps,
            tier: ProcessingTier::Cluster,
            environment: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Response to a job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

impl From<SubmitResponse> for JobHandle {
    fn from(value: SubmitResponse) -> Self {
        JobHandle::new(value.job_id)
    }
}

/// Lifecycle state reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    /// States before the container starts executing.
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            LifecycleState::Provisioning | LifecycleState::Pending | LifecycleState::Activating
        )
    }

    /// The container has run and is being torn down, or is still running.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            LifecycleState::Running
                | LifecycleState::Deactivating
                | LifecycleState::Stopping
                | LifecycleState::Deprovisioning
        )
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, LifecycleState::Stopped)
    }
}

/// Status of a submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Where the rendered output landed
    #[serde(default)]
    pub result_locator: Option<String>,
}

impl JobStatusReport {
    pub fn new(lifecycle_state: LifecycleState) -> Self {
        Self {
            lifecycle_state,
            stop_reason: None,
            exit_code: None,
            result_locator: None,
        }
    }

    pub fn stopped(exit_code: Option<i32>, stop_reason: Option<&str>) -> Self {
        Self {
            lifecycle_state: LifecycleState::Stopped,
            stop_reason: stop_reason.map(str::to_string),
            exit_code,
            result_locator: None,
        }
    }

    pub fn with_result(mut self, locator: impl Into<String>) -> Self {
        self.result_locator = Some(locator.into());
        self
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
