//! Execution monitor: submit the Job, wait for its pod, wait for a terminal phase,
//! then read the logs.
//!
//! ```text
//! Submitted -> AwaitingPod -> AwaitingTerminal -> Terminal (Succeeded | Failed)
//!                  |                 |
//!                  +-----------------+--> TimedOut
//! ```
//!
//! Both waits are bounded. Dropping the returned future abandons polling; the Job
//! itself keeps running until its own deadline.

use crate::cluster::ClusterHandle;
use crate::config::PollingConfig;
use crate::error::{Result, RunnerError};
use crate::template::JobSpec;
use crate::types::{ExecutionResult, ExecutionStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Polling cadence and bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub pod_timeout: Duration,
    pub completion_timeout: Duration,
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            pod_timeout: config.pod_timeout(),
            completion_timeout: config.completion_timeout(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Pod phases the monitor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Succeeded,
    Failed,
    Pending,
    Running,
    Unknown,
}

impl PodPhase {
    #[must_use]
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            _ => PodPhase::Unknown,
        }
    }

    /// Terminal phases map onto an execution status
    #[must_use]
    pub fn terminal_status(self) -> Option<ExecutionStatus> {
        match self {
            PodPhase::Succeeded => Some(ExecutionStatus::Succeeded),
            PodPhase::Failed => Some(ExecutionStatus::Failed),
            PodPhase::Pending | PodPhase::Running | PodPhase::Unknown => None,
        }
    }
}

/// Where a timeout happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitStage {
    Pod,
    Completion,
}

#[derive(Debug)]
enum MonitorState {
    Submitted,
    AwaitingPod { deadline: Instant },
    AwaitingTerminal { pod: String, deadline: Instant },
    Terminal { pod: String, status: ExecutionStatus },
    TimedOut { pod: Option<String>, stage: WaitStage },
}

/// Drives one Job from submission to a result.
pub struct ExecutionMonitor {
    cluster: ClusterHandle,
    settings: PollSettings,
}

impl ExecutionMonitor {
    #[must_use]
    pub fn new(cluster: ClusterHandle, settings: PollSettings) -> Self {
        Self { cluster, settings }
    }

    /// Submit `spec` once and block until it reaches a terminal phase or a bound expires.
    ///
    /// Only submission failures are errors; a timeout is a [`ExecutionStatus::TimedOut`] result.
    #[instrument(skip(self, spec), fields(job = %spec.generated_name, namespace = %spec.namespace))]
    pub async fn run(&self, spec: &JobSpec) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let mut state = MonitorState::Submitted;

        loop {
            state = match state {
                MonitorState::Submitted => {
                    self.submit(spec).await?;
                    MonitorState::AwaitingPod {
                        deadline: Instant::now() + self.settings.pod_timeout,
                    }
                }
                MonitorState::AwaitingPod { deadline } => match self.find_pod(spec).await {
                    Some(pod) => {
                        info!(pod = %pod, "Pod found for job");
                        MonitorState::AwaitingTerminal {
                            pod,
                            deadline: Instant::now() + self.settings.completion_timeout,
                        }
                    }
                    None if Instant::now() >= deadline => MonitorState::TimedOut {
                        pod: None,
                        stage: WaitStage::Pod,
                    },
                    None => {
                        tokio::time::sleep(self.settings.interval).await;
                        MonitorState::AwaitingPod { deadline }
                    }
                },
                MonitorState::AwaitingTerminal { pod, deadline } => {
                    match self.read_phase(spec, &pod).await.terminal_status() {
                        Some(status) => {
                            info!(pod = %pod, status = %status, "Pod finished");
                            MonitorState::Terminal { pod, status }
                        }
                        None if Instant::now() >= deadline => MonitorState::TimedOut {
                            pod: Some(pod),
                            stage: WaitStage::Completion,
                        },
                        None => {
                            tokio::time::sleep(self.settings.interval).await;
                            MonitorState::AwaitingTerminal { pod, deadline }
                        }
                    }
                }
                MonitorState::Terminal { pod, status } => {
                    return Ok(self.finish(spec, pod, status, started_at).await);
                }
                MonitorState::TimedOut { pod, stage } => {
                    return Ok(self.timed_out(spec, pod, stage, started_at).await);
                }
            };
        }
    }

    async fn submit(&self, spec: &JobSpec) -> Result<()> {
        match self.cluster.create_job(&spec.namespace, &spec.job).await {
            Ok(_) => {
                info!(job = %spec.generated_name, "Job created");
                Ok(())
            }
            Err(e) => {
                error!(job = %spec.generated_name, error = %e, "Failed to submit job");
                Err(RunnerError::JobSubmission {
                    name: spec.generated_name.clone(),
                    source: e,
                })
            }
        }
    }

    /// First pod carrying the job's label, if any
    async fn find_pod(&self, spec: &JobSpec) -> Option<String> {
        match self
            .cluster
            .list_job_pods(&spec.namespace, &spec.generated_name)
            .await
        {
            Ok(pods) => pods.into_iter().find_map(|pod| pod.metadata.name),
            Err(e) => {
                warn!(job = %spec.generated_name, error = %e, "Failed to list job pods, will retry");
                None
            }
        }
    }

    async fn read_phase(&self, spec: &JobSpec, pod: &str) -> PodPhase {
        match self.cluster.pod_phase(&spec.namespace, pod).await {
            Ok(phase) => {
                debug!(pod = %pod, phase = phase.as_deref().unwrap_or("<none>"), "Pod phase");
                PodPhase::parse(phase.as_deref())
            }
            Err(e) => {
                warn!(pod = %pod, error = %e, "Failed to read pod status, will retry");
                PodPhase::Unknown
            }
        }
    }

    async fn finish(
        &self,
        spec: &JobSpec,
        pod: String,
        status: ExecutionStatus,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        let (log, description) = match self.cluster.pod_logs(&spec.namespace, &pod).await {
            Ok(log) => {
                debug!(pod = %pod, bytes = log.len(), "Fetched pod logs");
                (log, format!("Job executed with status: {status}"))
            }
            Err(e) => {
                warn!(pod = %pod, error = %e, "Failed to fetch pod logs");
                (
                    String::new(),
                    format!("Job executed with status: {status} (logs unavailable: {e})"),
                )
            }
        };

        ExecutionResult {
            status,
            log,
            description,
            job_name: Some(spec.generated_name.clone()),
            pod_name: Some(pod),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn timed_out(
        &self,
        spec: &JobSpec,
        pod: Option<String>,
        stage: WaitStage,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        let mut description = match stage {
            WaitStage::Pod => format!(
                "No pod appeared for job {} within {}s",
                spec.generated_name,
                self.settings.pod_timeout.as_secs_f64()
            ),
            WaitStage::Completion => format!(
                "Job {} did not finish within {}s",
                spec.generated_name,
                self.settings.completion_timeout.as_secs_f64()
            ),
        };
        warn!(job = %spec.generated_name, "{}", description);

        // Whatever the pod printed so far
        let log = match &pod {
            Some(pod) => match self.cluster.pod_logs(&spec.namespace, pod).await {
                Ok(log) => log,
                Err(e) => {
                    warn!(pod = %pod, error = %e, "Failed to fetch logs of timed-out pod");
                    description.push_str(&format!(" (logs unavailable: {e})"));
                    String::new()
                }
            },
            None => String::new(),
        };

        ExecutionResult {
            status: ExecutionStatus::TimedOut,
            log,
            description,
            job_name: Some(spec.generated_name.clone()),
            pod_name: pod,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
