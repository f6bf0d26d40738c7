//! Kubernetes access for the runner.
//!
//! Every component receives a [`ClusterHandle`] instead of reaching for global
//! credentials, so tests can substitute the cluster with a mock.

pub mod session;

use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{ConfigMap, Pod},
};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy};
use kube::Client;
use std::sync::Arc;
use tracing::debug;

pub use session::{connect, ClusterSession};

/// Shared handle to the cluster used by all components.
pub type ClusterHandle = Arc<dyn ClusterApi>;

/// Label the Job controller puts on every pod it creates.
pub const JOB_NAME_LABEL: &str = "job-name";

/// The resource verbs the runner needs, scoped by namespace.
///
/// Errors are returned as raw `kube::Error`s so callers can tell a 409/404 apart
/// from a real failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a ConfigMap
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    /// Delete a ConfigMap by name
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// Create a Job
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error>;

    /// Delete a Job and, in the background, its pods
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// Pods labelled `job-name=<job_name>`
    async fn list_job_pods(&self, namespace: &str, job_name: &str)
        -> Result<Vec<Pod>, kube::Error>;

    /// Current `status.phase` of a pod
    async fn pod_phase(&self, namespace: &str, pod_name: &str)
        -> Result<Option<String>, kube::Error>;

    /// Full log stream of a pod
    async fn pod_logs(&self, namespace: &str, pod_name: &str) -> Result<String, kube::Error>;
}

/// [`ClusterApi`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn into_handle(self) -> ClusterHandle {
        Arc::new(self)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error> {
        self.jobs(namespace).create(&PostParams::default(), job).await
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        // Use Background propagation to ensure pods are cleaned up
        let delete_params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.jobs(namespace)
            .delete(name, &delete_params)
            .await
            .map(|_| ())
    }

    async fn list_job_pods(
        &self,
        namespace: &str,
        job_name: &str,
    ) -> Result<Vec<Pod>, kube::Error> {
        let selector = format!("{JOB_NAME_LABEL}={job_name}");
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;
        debug!(job = %job_name, count = pods.items.len(), "Listed job pods");
        Ok(pods.items)
    }

    async fn pod_phase(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<String>, kube::Error> {
        let pod = self.pods(namespace).get_status(pod_name).await?;
        Ok(pod.status.and_then(|status| status.phase))
    }

    async fn pod_logs(&self, namespace: &str, pod_name: &str) -> Result<String, kube::Error> {
        self.pods(namespace)
            .logs(pod_name, &LogParams::default())
            .await
    }
}
