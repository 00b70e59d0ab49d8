//! Compute cluster HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info, warn};
use vprep_models::JobHandle;

use crate::error::{ClusterError, ClusterResult};
use crate::types::{HealthResponse, JobStatusReport, RenderJobSpec, SubmitResponse};

/// The cluster operations the remote job monitor depends on.
#[async_trait]
pub trait ComputeCluster: Send + Sync {
    /// Submit a render job and return its handle.
    async fn submit_job(&self, spec: &RenderJobSpec) -> ClusterResult<JobHandle>;

    /// Query the current status of a submitted job.
    async fn get_job_status(&self, job: &JobHandle) -> ClusterResult<JobStatusReport>;
}

/// Configuration for the cluster client.
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    /// Base URL of the cluster API
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Bearer token, if the cluster requires one
    pub api_token: Option<String>,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            api_token: None,
        }
    }
}

impl ClusterClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("VPREP_CLUSTER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            timeout: Duration::from_secs(
                std::env::var("VPREP_CLUSTER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            api_token: std::env::var("VPREP_CLUSTER_API_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

/// HTTP client for the compute cluster API.
///
/// `POST {base}/jobs` submits, `GET {base}/jobs/{id}` reports status.
#[derive(Clone)]
pub struct HttpClusterClient {
    http: Client,
    config: ClusterClientConfig,
}

impl HttpClusterClient {
    /// Create a new cluster client.
    pub fn new(config: ClusterClientConfig) -> ClusterResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(ClusterError::Config("base_url is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClusterError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClusterResult<Self> {
        Self::new(ClusterClientConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(response: Response) -> ClusterResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 503 {
            return Err(ClusterError::ServiceUnavailable(body));
        }
        Err(ClusterError::http(status.as_u16(), body))
    }

    /// Check if the cluster API is healthy.
    pub async fn health_check(&self) -> ClusterResult<bool> {
        let url = self.url("/health");

        match self.authorize(self.http.get(&url)).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Cluster health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Cluster health check error: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ComputeCluster for HttpClusterClient {
    async fn submit_job(&self, spec: &RenderJobSpec) -> ClusterResult<JobHandle> {
        let url = self.url("/jobs");
        debug!(job_name = %spec.name, "Submitting render job to {}", url);

        let response = self.authorize(self.http.post(&url).json(spec)).send().await?;
        let response = Self::ensure_success(response).await?;

        let submitted: SubmitResponse = response.json().await?;
        if submitted.job_id.trim().is_empty() {
            return Err(ClusterError::InvalidResponse("empty job_id".to_string()));
        }

        info!(job_id = %submitted.job_id, job_name = %spec.name, "Render job submitted");
        Ok(submitted.into())
    }

    async fn get_job_status(&self, job: &JobHandle) -> ClusterResult<JobStatusReport> {
        let url = self.url(&format!("/jobs/{}", job.as_str()));

        let response = self.authorize(self.http.get(&url)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(ClusterError::JobNotFound(job.as_str().to_string()));
        }
        let response = Self::ensure_success(response).await?;

        let report: JobStatusReport = response.json().await?;
        debug!(job_id = %job, state = ?report.lifecycle_state, "Job status");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleState;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> HttpClusterClient {
        HttpClusterClient::new(ClusterClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            api_token: token.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = ClusterClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = ClusterClientConfig {
            base_url: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(HttpClusterClient::new(config), Err(ClusterError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({ "video_url": "https://cdn/a.mp4" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "job_id": "job-42" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        let spec = RenderJobSpec::new("render", "https://cdn/a.mp4", 300, 30);
        let handle = client.submit_job(&spec).await.unwrap();
        assert_eq!(handle.as_str(), "job-42");
    }

    #[tokio::test]
    async fn test_submit_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad spec"))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client
            .submit_job(&RenderJobSpec::new("render", "https://cdn/a.mp4", 300, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Http { status: 400, ref body } if body == "bad spec"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_job_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lifecycle_state": "STOPPED",
                "exit_code": 0,
                "result_locator": "s3://renders/job-42.mp4"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let report = client.get_job_status(&JobHandle::new("job-42")).await.unwrap();
        assert_eq!(report.lifecycle_state, LifecycleState::Stopped);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.result_locator.as_deref(), Some("s3://renders/job-42.mp4"));
    }

    #[tokio::test]
    async fn test_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert!(matches!(
            client.get_job_status(&JobHandle::new("missing")).await,
            Err(ClusterError::JobNotFound(_))
        ));
        let err = client.get_job_status(&JobHandle::new("busy")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })))
            .mount(&server)
            .await;

        assert!(client_for(&server, None).health_check().await.unwrap());
    }
}
