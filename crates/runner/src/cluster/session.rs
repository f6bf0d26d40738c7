//! Cluster session: local kubeconfig first, in-cluster service account second.

use super::{ClusterHandle, KubeCluster};
use crate::error::{Result, RunnerError};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Build a fresh handle from local kubeconfig, falling back to in-cluster credentials.
#[instrument]
pub async fn connect() -> Result<ClusterHandle> {
    let config = match Config::from_kubeconfig(&KubeConfigOptions::default()).await {
        Ok(config) => {
            debug!("Using local kubeconfig");
            config
        }
        Err(kubeconfig_err) => {
            warn!(error = %kubeconfig_err, "Local kubeconfig unavailable, trying in-cluster config");
            Config::incluster().map_err(|incluster_err| {
                RunnerError::Connection(format!(
                    "kubeconfig: {kubeconfig_err}; in-cluster: {incluster_err}"
                ))
            })?
        }
    };

    let client = Client::try_from(config)
        .map_err(|e| RunnerError::Connection(format!("failed to build client: {e}")))?;
    info!("Connected to Kubernetes cluster");

    Ok(KubeCluster::new(client).into_handle())
}

/// Caches the first successful [`connect`] so later calls reuse the same handle.
#[derive(Default)]
pub struct ClusterSession {
    handle: OnceCell<ClusterHandle>,
}

impl ClusterSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session that is already connected, e.g. to a test double
    #[must_use]
    pub fn with_handle(handle: ClusterHandle) -> Self {
        Self {
            handle: OnceCell::new_with(Some(handle)),
        }
    }

    /// Return the cached handle, connecting on first use.
    pub async fn connect(&self) -> Result<ClusterHandle> {
        self.handle.get_or_try_init(connect).await.cloned()
    }

    /// Whether a handle has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use serial_test::serial;
    use std::sync::Arc;

    #[tokio::test]
    async fn seeded_session_returns_same_handle() {
        let handle: ClusterHandle = Arc::new(MockClusterApi::new());
        let session = ClusterSession::with_handle(handle.clone());

        assert!(session.is_connected());
        let first = session.connect().await.unwrap();
        let second = session.connect().await.unwrap();
        assert!(Arc::ptr_eq(&first, &handle));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    #[serial]
    async fn connect_fails_when_no_credentials_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("KUBECONFIG", dir.path().join("missing-kubeconfig"));
        std::env::remove_var("KUBERNETES_SERVICE_HOST");
        std::env::remove_var("KUBERNETES_SERVICE_PORT");

        let session = ClusterSession::new();
        let result = session.connect().await;
        std::env::remove_var("KUBECONFIG");

        assert!(matches!(result, Err(RunnerError::Connection(_))));
        assert!(!session.is_connected());
    }
}
