//! Run request handler: package, instantiate, monitor, clean up.

use crate::cleanup::{ArtifactGuard, CleanupGuarantor};
use crate::cluster::ClusterHandle;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::language::Language;
use crate::monitor::{ExecutionMonitor, PollSettings};
use crate::package::{PackageArtifact, PackageBuilder};
use crate::template::{JobInstantiator, TemplateStore};
use crate::types::{ExecutionRequest, ExecutionResult, ExecutionStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Supplies a language when the request does not declare one.
///
/// Detection itself (e.g. an LLM call) lives outside this crate.
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, source_code: &str) -> Option<Language>;
}

/// Composes the runner components into one request/response cycle.
pub struct Orchestrator {
    builder: PackageBuilder,
    instantiator: JobInstantiator,
    monitor: ExecutionMonitor,
    cleanup: CleanupGuarantor,
    templates: Arc<TemplateStore>,
    detector: Option<Arc<dyn LanguageDetector>>,
    delete_jobs: bool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(cluster: ClusterHandle, config: &RunnerConfig, templates: Arc<TemplateStore>) -> Self {
        Self::with_poll_settings(cluster, config, templates, PollSettings::from(&config.polling))
    }

    /// Same as [`Orchestrator::new`] with explicit polling bounds
    #[must_use]
    pub fn with_poll_settings(
        cluster: ClusterHandle,
        config: &RunnerConfig,
        templates: Arc<TemplateStore>,
        settings: PollSettings,
    ) -> Self {
        Self {
            builder: PackageBuilder::new(cluster.clone(), config.namespace.clone()),
            instantiator: JobInstantiator::new(config.templates.clone(), config.job.clone()),
            monitor: ExecutionMonitor::new(cluster.clone(), settings),
            cleanup: CleanupGuarantor::new(cluster, config.namespace.clone()),
            templates,
            detector: None,
            delete_jobs: config.cleanup.delete_jobs,
        }
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Run one request to completion.
    ///
    /// Unparsable sources and undeterminable languages come back as
    /// [`ExecutionStatus::Rejected`] without touching the cluster. Once the artifact
    /// exists it is deleted exactly once, including when a later stage fails.
    #[instrument(skip(self, request), fields(language = ?request.language))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let started_at = Utc::now();

        let Some(language) = self.resolve_language(&request).await else {
            return Ok(ExecutionResult::rejected(
                "Language was not given and could not be detected",
                started_at,
            ));
        };

        let artifact = match self.builder.build(&request.source_code, language).await {
            Ok(artifact) => artifact,
            Err(RunnerError::MalformedSource(reason)) => {
                info!(reason = %reason, "Rejected source before cluster submission");
                return Ok(ExecutionResult::rejected(reason, started_at));
            }
            Err(e) => return Err(e),
        };

        let mut guard = self.cleanup.guard(artifact.name.clone());
        let outcome = self.run_artifact(&artifact, language, &mut guard).await;

        let delete_job = match &outcome {
            Ok(result) => self.delete_jobs || result.status == ExecutionStatus::TimedOut,
            Err(RunnerError::JobSubmission { .. }) => false,
            Err(_) => true,
        };
        if let Err(e) = guard.release(delete_job).await {
            // Never overrides the primary result
            warn!(artifact = %artifact.name, error = %e, "Artifact cleanup failed");
        }

        if let Ok(result) = &outcome {
            info!(
                job = result.job_name.as_deref().unwrap_or_default(),
                status = %result.status,
                elapsed_ms = result.elapsed().num_milliseconds(),
                "Execution finished"
            );
        }
        outcome
    }

    async fn resolve_language(&self, request: &ExecutionRequest) -> Option<Language> {
        if let Some(language) = request.language {
            return Some(language);
        }
        let detector = self.detector.as_ref()?;
        let detected = detector.detect(&request.source_code).await;
        info!(detected = ?detected, "Language detection finished");
        detected
    }

    async fn run_artifact(
        &self,
        artifact: &PackageArtifact,
        language: Language,
        guard: &mut ArtifactGuard,
    ) -> Result<ExecutionResult> {
        let template = self.templates.get(language)?;
        let spec = self.instantiator.instantiate(template, artifact, language)?;
        guard.track_job(spec.generated_name.clone());
        self.monitor.run(&spec).await
    }
}
