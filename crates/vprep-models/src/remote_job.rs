//! Remote (cluster) render job state.
//!
//! `Queued` is initial; `Succeeded`, `Failed` and `TimedOut` are terminal.
//! Transitions only move forward:
//!
//! ```text
//! Queued -> Starting -> Running -> Succeeded | Failed
//!    \__________\__________\_____-> TimedOut
//! ```

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle returned by the compute cluster on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monitor-side state of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobState {
    #[default]
    Queued,
    Starting,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RemoteJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteJobState::Queued => "queued",
            RemoteJobState::Starting => "starting",
            RemoteJobState::Running => "running",
            RemoteJobState::Succeeded => "succeeded",
            RemoteJobState::Failed => "failed",
            RemoteJobState::TimedOut => "timed_out",
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteJobState::Succeeded | RemoteJobState::Failed | RemoteJobState::TimedOut
        )
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: RemoteJobState) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match next {
            RemoteJobState::Queued => false,
            RemoteJobState::Starting => *self == RemoteJobState::Queued,
            RemoteJobState::Running => {
                matches!(self, RemoteJobState::Queued | RemoteJobState::Starting)
            }
            RemoteJobState::Succeeded | RemoteJobState::Failed | RemoteJobState::TimedOut => true,
        }
    }
}

impl fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a remote job did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteJobFailure {
    /// The cluster rejected the submission.
    SubmitRejected { message: String },
    /// The job ran and exited non-zero (or without an exit code).
    Exited {
        stop_reason: Option<String>,
        exit_code: Option<i32>,
    },
    /// Status queries kept failing past the safety margin.
    StatusUnavailable { message: String },
    /// The job succeeded but reported no result locator.
    MissingResultLocator,
    /// The monitor gave up at the wall-clock ceiling.
    TimedOut { elapsed_secs: u64 },
}

impl fmt::Display for RemoteJobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteJobFailure::SubmitRejected { message } => {
                write!(f, "job submission failed: {}", message)
            }
            RemoteJobFailure::Exited {
                stop_reason,
                exit_code,
            } => write!(
                f,
                "job failed: {} (exit code {})",
                stop_reason.as_deref().unwrap_or("no stop reason"),
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ),
            RemoteJobFailure::StatusUnavailable { message } => {
                write!(f, "job status unavailable: {}", message)
            }
            RemoteJobFailure::MissingResultLocator => {
                write!(f, "job succeeded but reported no output location")
            }
            RemoteJobFailure::TimedOut { elapsed_secs } => {
                write!(f, "job timed out after {}s", elapsed_secs)
            }
        }
    }
}

/// Progress event emitted by the monitor on every poll and transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemoteJobEvent {
    pub job: Option<JobHandle>,
    pub state: RemoteJobState,
    /// Non-decreasing percentage, 100 only once succeeded
    pub progress: u8,
    pub elapsed_ms: u64,
    pub message: String,
}

/// Final report of one monitored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemoteJobReport {
    pub job: Option<JobHandle>,
    pub state: RemoteJobState,
    pub progress: u8,
    /// Output URL extracted from job metadata on success
    pub result_locator: Option<String>,
    pub stop_reason: Option<String>,
    pub exit_code: Option<i32>,
    pub failure: Option<RemoteJobFailure>,
    pub polls: u32,
    pub query_errors: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RemoteJobReport {
    /// Succeeded and produced a result locator.
    pub fn is_success(&self) -> bool {
        self.state == RemoteJobState::Succeeded && self.result_locator.is_some()
    }

    /// Error text for callers, if any.
    pub fn error(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }
}
