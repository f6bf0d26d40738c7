//! Runner Configuration
//!
//! Loaded from a mounted YAML file, falling back to defaults, with a small set of
//! environment overrides applied on top.

use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Main runner configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Namespace that artifacts, jobs and pods live in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Job template configuration
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Polling configuration for the execution monitor
    #[serde(default)]
    pub polling: PollingConfig,

    /// Job hardening applied on top of the templates
    #[serde(default)]
    pub job: JobConfig,

    /// Cleanup configuration
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Job template configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    /// Directory holding `<language>-job.yaml` manifests
    #[serde(default = "default_templates_directory")]
    pub directory: PathBuf,

    /// Name of the ConfigMap volume to bind; the first ConfigMap volume when unset
    #[serde(default)]
    pub code_volume: Option<String>,

    /// Where the code volume is mounted inside the container
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Writable directory compiled languages build in
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

/// Polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    /// Seconds between pod list / phase reads
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Upper bound on waiting for the Job's pod to appear
    #[serde(default = "default_pod_timeout_seconds")]
    pub pod_timeout_seconds: u64,

    /// Upper bound on waiting for the pod to reach a terminal phase
    #[serde(default = "default_completion_timeout_seconds")]
    pub completion_timeout_seconds: u64,
}

/// Job configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Job timeout in seconds, used when the template has none
    #[serde(default = "default_active_deadline_seconds")]
    pub active_deadline_seconds: i64,

    /// TTL for finished jobs, used when the template has none
    #[serde(default = "default_ttl_seconds_after_finished")]
    pub ttl_seconds_after_finished: i32,
}

/// Cleanup configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupConfig {
    /// Delete the Job after its logs were read (timed-out jobs are always deleted)
    #[serde(default = "default_delete_jobs")]
    pub delete_jobs: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_templates_directory() -> PathBuf {
    PathBuf::from("templates/jobs")
}

fn default_mount_path() -> String {
    "/mnt/config".to_string()
}

fn default_work_dir() -> String {
    "/tmp".to_string()
}

fn default_interval_seconds() -> u64 {
    2
}

fn default_pod_timeout_seconds() -> u64 {
    120 // 2 minutes
}

fn default_completion_timeout_seconds() -> u64 {
    300 // 5 minutes
}

fn default_active_deadline_seconds() -> i64 {
    600 // 10 minutes
}

fn default_ttl_seconds_after_finished() -> i32 {
    300
}

fn default_delete_jobs() -> bool {
    true
}

fn default_port() -> u16 {
    8000
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            directory: default_templates_directory(),
            code_volume: None,
            mount_path: default_mount_path(),
            work_dir: default_work_dir(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            pod_timeout_seconds: default_pod_timeout_seconds(),
            completion_timeout_seconds: default_completion_timeout_seconds(),
        }
    }
}

impl PollingConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    #[must_use]
    pub fn pod_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_timeout_seconds)
    }

    #[must_use]
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_seconds)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            active_deadline_seconds: default_active_deadline_seconds(),
            ttl_seconds_after_finished: default_ttl_seconds_after_finished(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            delete_jobs: default_delete_jobs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            templates: TemplateConfig::default(),
            polling: PollingConfig::default(),
            job: JobConfig::default(),
            cleanup: CleanupConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        debug!(path = %path.display(), "Loaded runner configuration");
        Ok(config)
    }

    /// Load from `path` when given, fall back to defaults, apply env overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => match Self::from_mounted_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load configuration, using defaults"
                    );
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `RUNNER_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(namespace) = std::env::var("RUNNER_NAMESPACE") {
            if !namespace.trim().is_empty() {
                self.namespace = namespace.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("RUNNER_TEMPLATES_DIR") {
            if !dir.trim().is_empty() {
                self.templates.directory = PathBuf::from(dir.trim());
            }
        }
        if let Some(port) = std::env::var("RUNNER_PORT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.server.port = port;
        }
    }

    /// Validate that the configuration can drive an execution
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(RunnerError::Config("namespace must not be empty".to_string()));
        }
        if self.polling.interval_seconds == 0 {
            return Err(RunnerError::Config(
                "polling.intervalSeconds must be greater than zero".to_string(),
            ));
        }
        if self.polling.pod_timeout_seconds < self.polling.interval_seconds
            || self.polling.completion_timeout_seconds < self.polling.interval_seconds
        {
            return Err(RunnerError::Config(
                "polling timeouts must be at least one polling interval".to_string(),
            ));
        }
        if self.job.active_deadline_seconds <= 0 {
            return Err(RunnerError::Config(
                "job.activeDeadlineSeconds must be positive".to_string(),
            ));
        }
        if !self.templates.mount_path.starts_with('/') || !self.templates.work_dir.starts_with('/')
        {
            return Err(RunnerError::Config(
                "templates.mountPath and templates.workDir must be absolute".to_string(),
            ));
        }
        Ok(())
    }
}
