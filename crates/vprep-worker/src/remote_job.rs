//! Remote job monitor.
//!
//! Submits a render job to the compute cluster and polls it until it reaches
//! a terminal state or the wall-clock ceiling. Cluster lifecycle states map
//! onto [`RemoteJobState`]:
//!
//! | Cluster                                        | Monitor     |
//! |------------------------------------------------|-------------|
//! | PROVISIONING, PENDING, ACTIVATING              | Starting    |
//! | RUNNING, DEACTIVATING, STOPPING, DEPROVISIONING | Running     |
//! | STOPPED with exit code 0                       | Succeeded   |
//! | STOPPED otherwise                              | Failed      |

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vprep_cluster::{ClusterError, ComputeCluster, JobStatusReport, LifecycleState, RenderJobSpec};
use vprep_models::{JobHandle, RemoteJobEvent, RemoteJobFailure, RemoteJobReport, RemoteJobState};

use crate::config::MonitorConfig;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Progress while running: ramps linearly from `running_progress` to the cap
/// over `expected_running`, then holds at the cap.
pub fn running_progress(config: &MonitorConfig, running_for: Duration) -> u8 {
    let floor = f64::from(config.running_progress);
    let cap = f64::from(config.running_progress_cap);
    let fraction = if config.expected_running.is_zero() {
        1.0
    } else {
        (running_for.as_secs_f64() / config.expected_running.as_secs_f64()).min(1.0)
    };
    (floor + (cap - floor) * fraction).floor() as u8
}

/// Mutable view of one job while it is being monitored.
struct JobRun<'a> {
    config: &'a MonitorConfig,
    events: Option<mpsc::Sender<RemoteJobEvent>>,
    job: Option<JobHandle>,
    state: RemoteJobState,
    progress: u8,
    started: Instant,
    running_since: Option<Instant>,
    polls: u32,
    query_errors: u32,
    last_report: Option<JobStatusReport>,
}

impl<'a> JobRun<'a> {
    fn new(config: &'a MonitorConfig, events: Option<mpsc::Sender<RemoteJobEvent>>) -> Self {
        Self {
            config,
            events,
            job: None,
            state: RemoteJobState::Queued,
            progress: 0,
            started: Instant::now(),
            running_since: None,
            polls: 0,
            query_errors: 0,
            last_report: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Move forward to `next`; backward or repeated transitions are ignored.
    fn transition(&mut self, next: RemoteJobState) {
        if !self.state.can_transition_to(next) {
            return;
        }
        debug!(job_id = ?self.job, from = %self.state, to = %next, "Remote job state change");
        self.state = next;
        match next {
            RemoteJobState::Starting => self.raise_progress(self.config.starting_progress),
            RemoteJobState::Running => {
                self.running_since = Some(Instant::now());
                self.raise_progress(self.config.running_progress);
            }
            RemoteJobState::Succeeded => self.progress = 100,
            _ => {}
        }
    }

    fn raise_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(self.config.running_progress_cap));
    }

    fn emit(&self, message: impl Into<String>) {
        let Some(events) = &self.events else {
            return;
        };
        let event = RemoteJobEvent {
            job: self.job.clone(),
            state: self.state,
            progress: self.progress,
            elapsed_ms: self.elapsed().as_millis() as u64,
            message: message.into(),
        };
        if let Err(e) = events.try_send(event) {
            debug!(error = %e, "Dropped remote job progress event");
        }
    }

    /// Apply one status report. Returns the failure cause once terminal.
    fn apply(&mut self, report: JobStatusReport) -> Option<Option<RemoteJobFailure>> {
        let state = report.lifecycle_state;
        let exit_code = report.exit_code;
        let stop_reason = report.stop_reason.clone();
        let has_locator = report.result_locator.is_some();
        self.last_report = Some(report);

        if state.is_starting() {
            self.transition(RemoteJobState::Starting);
            self.emit(format!("Job starting ({:?})", state));
            return None;
        }

        if state.is_running() {
            self.transition(RemoteJobState::Running);
            if let Some(since) = self.running_since {
                self.raise_progress(running_progress(self.config, since.elapsed()));
            }
            self.emit(format!("Job running ({:?})", state));
            return None;
        }

        if state != LifecycleState::Stopped {
            debug!(job_id = ?self.job, "Unrecognised lifecycle state, still waiting");
            self.emit("Waiting for job status");
            return None;
        }

        if exit_code == Some(0) {
            self.transition(RemoteJobState::Succeeded);
            self.emit("Job succeeded");
            Some((!has_locator).then_some(RemoteJobFailure::MissingResultLocator))
        } else {
            let failure = RemoteJobFailure::Exited {
                stop_reason,
                exit_code,
            };
            self.transition(RemoteJobState::Failed);
            self.emit(failure.to_string());
            Some(Some(failure))
        }
    }

    fn finish(self, failure: Option<RemoteJobFailure>) -> RemoteJobReport {
        let elapsed = self.elapsed();
        let started_at = Utc::now()
            - chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let (result_locator, stop_reason, exit_code) = match self.last_report {
            Some(report) => (report.result_locator, report.stop_reason, report.exit_code),
            None => (None, None, None),
        };

        RemoteJobReport {
            job: self.job,
            state: self.state,
            progress: self.progress,
            result_locator,
            stop_reason,
            exit_code,
            failure,
            polls: self.polls,
            query_errors: self.query_errors,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Drives heavy-tier jobs on the compute cluster.
#[derive(Clone)]
pub struct RemoteJobMonitor {
    cluster: Arc<dyn ComputeCluster>,
    config: MonitorConfig,
}

impl RemoteJobMonitor {
    pub fn new(cluster: Arc<dyn ComputeCluster>, config: MonitorConfig) -> Self {
        Self { cluster, config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Submit `spec` and poll until terminal.
    ///
    /// Progress events go to `events` (best-effort; a full channel drops the
    /// event). The whole job is never resubmitted.
    pub async fn run(
        &self,
        spec: &RenderJobSpec,
        events: Option<mpsc::Sender<RemoteJobEvent>>,
    ) -> RemoteJobReport {
        let mut run = JobRun::new(&self.config, events);
        run.emit("Submitting job");

        let retry = RetryConfig::new("submit_job")
            .with_max_retries(self.config.submit_retries)
            .with_base_delay(self.config.submit_base_delay);
        let submission = retry_async(&retry, ClusterError::is_retryable, || self.cluster.submit_job(spec));
        let Ok(submitted) = tokio::time::timeout(self.config.timeout, submission).await else {
            warn!(name = %spec.name, "Remote job submission did not complete before the ceiling");
            let failure = self.timed_out(&mut run);
            return self.complete(run, Some(failure));
        };

        let job = match submitted {
            Ok(job) => job,
            Err(exhausted) => {
                warn!(
                    name = %spec.name,
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "Remote job submission failed"
                );
                let failure = RemoteJobFailure::SubmitRejected {
                    message: exhausted.error.to_string(),
                };
                run.transition(RemoteJobState::Failed);
                run.emit(failure.to_string());
                return self.complete(run, Some(failure));
            }
        };

        info!(job_id = %job, name = %spec.name, frames = spec.duration_in_frames, "Remote job submitted");
        run.job = Some(job.clone());
        run.transition(RemoteJobState::Starting);
        run.emit("Job submitted");

        let failure = self.poll(&mut run, &job).await;
        self.complete(run, failure)
    }

    async fn poll(&self, run: &mut JobRun<'_>, job: &JobHandle) -> Option<RemoteJobFailure> {
        let timeout = self.config.timeout;
        let query_deadline = timeout.saturating_sub(self.config.query_error_margin);
        let mut tracker = FailureTracker::new(self.config.max_logged_query_errors);

        loop {
            let remaining = timeout.saturating_sub(run.elapsed());
            if remaining.is_zero() {
                return Some(self.timed_out(run));
            }
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
            if run.elapsed() >= timeout {
                return Some(self.timed_out(run));
            }

            run.polls += 1;
            let remaining = timeout.saturating_sub(run.elapsed());
            let Ok(queried) = tokio::time::timeout(remaining, self.cluster.get_job_status(job)).await else {
                warn!(job_id = %job, "Job status query still pending at the ceiling");
                return Some(self.timed_out(run));
            };
            match queried {
                Ok(report) => {
                    tracker.record_success();
                    if let Some(failure) = run.apply(report) {
                        return failure;
                    }
                }
                Err(e) => {
                    run.query_errors += 1;
                    metrics::record_remote_poll_error();
                    if tracker.record_failure() {
                        warn!(job_id = %job, error = %e, failures = tracker.failure_count(), "Job status query failed");
                    }

                    if run.elapsed() >= query_deadline {
                        let failure = RemoteJobFailure::StatusUnavailable { message: e.to_string() };
                        run.transition(RemoteJobState::Failed);
                        run.emit(failure.to_string());
                        return Some(failure);
                    }
                    run.emit("Status query failed, retrying");
                }
            }
        }
    }

    fn timed_out(&self, run: &mut JobRun<'_>) -> RemoteJobFailure {
        let failure = RemoteJobFailure::TimedOut {
            elapsed_secs: run.elapsed().as_secs(),
        };
        run.transition(RemoteJobState::TimedOut);
        run.emit(failure.to_string());
        failure
    }

    fn complete(&self, run: JobRun<'_>, failure: Option<RemoteJobFailure>) -> RemoteJobReport {
        let report = run.finish(failure);
        metrics::record_remote_job(report.state.as_str());

        match &report.failure {
            None => info!(
                job_id = ?report.job,
                state = %report.state,
                elapsed_ms = report.elapsed_ms,
                polls = report.polls,
                "Remote job finished"
            ),
            Some(failure) => warn!(
                job_id = ?report.job,
                state = %report.state,
                elapsed_ms = report.elapsed_ms,
                error = %failure,
                "Remote job did not produce a result"
            ),
        }
        report
    }
}
