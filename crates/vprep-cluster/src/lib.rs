//! Client for the compute cluster that runs heavy-tier render jobs.
//!
//! The cluster accepts a job spec, returns a handle, and reports the job's
//! lifecycle state, stop reason, exit code and result locator on request.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClusterClientConfig, ComputeCluster, HttpClusterClient};
pub use error::{ClusterError, ClusterResult};
pub use types::{JobStatusReport, LifecycleState, RenderJobSpec, SubmitResponse};
