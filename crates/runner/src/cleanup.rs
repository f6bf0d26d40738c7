//! Cleanup guarantor: artifact ConfigMaps are deleted exactly once per execution,
//! whichever way the execution ends.

use crate::cluster::ClusterHandle;
use crate::error::{is_not_found, Result, RunnerError};
use tracing::{debug, info, warn};

/// Deletes the transient resources of one execution.
#[derive(Clone)]
pub struct CleanupGuarantor {
    cluster: ClusterHandle,
    namespace: String,
}

impl CleanupGuarantor {
    #[must_use]
    pub fn new(cluster: ClusterHandle, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Delete an artifact ConfigMap. A missing artifact counts as deleted.
    pub async fn delete(&self, artifact_name: &str) -> Result<()> {
        match self
            .cluster
            .delete_config_map(&self.namespace, artifact_name)
            .await
        {
            Ok(()) => {
                info!(artifact = %artifact_name, "Deleted artifact ConfigMap");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!(artifact = %artifact_name, "Artifact ConfigMap already gone");
                Ok(())
            }
            Err(e) => {
                warn!(artifact = %artifact_name, error = %e, "Failed to delete artifact ConfigMap");
                Err(RunnerError::ArtifactDeletion {
                    name: artifact_name.to_string(),
                    source: e,
                })
            }
        }
    }

    /// Delete a Job and its pods. A missing Job counts as deleted.
    pub async fn delete_job(&self, job_name: &str) -> Result<()> {
        match self.cluster.delete_job(&self.namespace, job_name).await {
            Ok(()) => {
                info!(job = %job_name, "Deleted job");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!(job = %job_name, "Job already gone");
                Ok(())
            }
            Err(e) => {
                warn!(job = %job_name, error = %e, "Failed to delete job");
                Err(e.into())
            }
        }
    }

    /// Scope an artifact to a guard that deletes it exactly once.
    #[must_use]
    pub fn guard(&self, artifact_name: impl Into<String>) -> ArtifactGuard {
        ArtifactGuard {
            cleanup: self.clone(),
            artifact: artifact_name.into(),
            job: None,
            released: false,
        }
    }
}

/// Owns the cleanup of one artifact (and, once submitted, its Job).
///
/// Call [`ArtifactGuard::release`] on every normal exit path. If the guard is dropped
/// without being released (the request future was cancelled), deletion is spawned on
/// the current tokio runtime instead.
pub struct ArtifactGuard {
    cleanup: CleanupGuarantor,
    artifact: String,
    job: Option<String>,
    released: bool,
}

impl ArtifactGuard {
    /// Remember the Job so an abandoned execution also removes it.
    pub fn track_job(&mut self, job_name: impl Into<String>) {
        self.job = Some(job_name.into());
    }

    /// Delete the artifact, then the tracked Job when `delete_job` is set.
    ///
    /// Both deletions run on a spawned task, so they complete even if the caller is
    /// dropped while waiting. Job deletion failures are logged only; the returned
    /// error is the artifact's.
    pub async fn release(mut self, delete_job: bool) -> Result<()> {
        self.released = true;
        let artifact = self.artifact.clone();
        let job = if delete_job { self.job.take() } else { None };

        tokio::spawn(delete_all(self.cleanup.clone(), artifact.clone(), job))
            .await
            .map_err(|e| RunnerError::CleanupInterrupted {
                name: artifact,
                reason: e.to_string(),
            })?
    }
}

/// Artifact first, so a slow Job deletion never holds the user's code in the cluster.
async fn delete_all(cleanup: CleanupGuarantor, artifact: String, job: Option<String>) -> Result<()> {
    let result = cleanup.delete(&artifact).await;
    if let Some(job) = job {
        let _ = cleanup.delete_job(&job).await;
    }
    result
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let cleanup = self.cleanup.clone();
        let artifact = std::mem::take(&mut self.artifact);
        let job = self.job.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(artifact = %artifact, "Execution abandoned, cleaning up in background");
                handle.spawn(async move {
                    let _ = delete_all(cleanup, artifact, job).await;
                });
            }
            Err(_) => {
                warn!(artifact = %artifact, "No runtime available, artifact left for manual cleanup");
            }
        }
    }
}
