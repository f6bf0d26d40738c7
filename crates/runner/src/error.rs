//! Error types for the code runner.

use thiserror::Error;

/// Errors that can occur while packaging, submitting or cleaning up an execution.
///
/// A timed-out execution is not an error: it is reported through
/// [`crate::ExecutionStatus::TimedOut`].
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Neither the local kubeconfig nor the in-cluster credentials produced a client
    #[error("Failed to connect to Kubernetes: {0}")]
    Connection(String),

    /// Source code could not be packaged (e.g. no public class declaration)
    #[error("Malformed source: {0}")]
    MalformedSource(String),

    /// Language is not one of the supported variants
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The code ConfigMap could not be created
    #[error("Failed to create artifact {name}: {source}")]
    ArtifactCreation {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The Job could not be submitted
    #[error("Failed to submit job {name}: {source}")]
    JobSubmission {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The cleanup task stopped before reporting a result
    #[error("Cleanup of artifact {name} did not complete: {reason}")]
    CleanupInterrupted { name: String, reason: String },

    /// The code ConfigMap could not be deleted
    #[error("Failed to delete artifact {name}: {source}")]
    ArtifactDeletion {
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A Job template is missing or does not have the expected shape
    #[error("Job template error: {0}")]
    Template(String),

    /// Invalid runner configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unclassified Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

/// Returns the HTTP status code of a Kubernetes API error, if there is one.
#[must_use]
pub fn api_status(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    }
}

/// True when the API server rejected a create because the object already exists.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    api_status(err) == Some(409)
}

/// True when the API server reported that the object does not exist.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    api_status(err) == Some(404)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected {reason}"),
        reason: reason.to_string(),
        code,
    })
}
