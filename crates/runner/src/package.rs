//! Code package builder: turns user source into a ConfigMap the Job can mount.

use crate::cluster::ClusterHandle;
use crate::error::{is_conflict, Result, RunnerError};
use crate::language::Language;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Prefix for artifact ConfigMap names
pub const ARTIFACT_PREFIX: &str = "code-";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_COMPONENT: &str = "code-runner/component";
pub const LABEL_LANGUAGE: &str = "code-runner/language";
pub const MANAGED_BY: &str = "code-runner";

/// Transient bundle holding user code inside the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    pub name: String,
    pub namespace: String,
    pub filename: String,
    pub content: String,
    pub language: Language,
}

impl PackageArtifact {
    /// Derive the artifact for `content` without touching the cluster.
    ///
    /// Fails with [`RunnerError::MalformedSource`] when a class-based language has no
    /// public class declaration.
    pub fn prepare(content: &str, language: Language, namespace: &str) -> Result<Self> {
        let filename = language.source_filename(content)?;
        Ok(Self {
            name: generate_artifact_name(),
            namespace: namespace.to_string(),
            filename,
            content: content.to_string(),
            language,
        })
    }

    /// ConfigMap holding `{filename: content}`
    #[must_use]
    pub fn to_config_map(&self) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert(self.filename.clone(), self.content.clone());

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(artifact_labels(self.language)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Labels shared by every artifact ConfigMap
#[must_use]
pub fn artifact_labels(language: Language) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), "artifact".to_string());
    labels.insert(LABEL_LANGUAGE.to_string(), language.as_str().to_string());
    labels
}

fn generate_artifact_name() -> String {
    format!("{ARTIFACT_PREFIX}{}", Uuid::new_v4().simple())
}

/// Creates artifact ConfigMaps in the cluster.
pub struct PackageBuilder {
    cluster: ClusterHandle,
    namespace: String,
}

impl PackageBuilder {
    #[must_use]
    pub fn new(cluster: ClusterHandle, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Package `content` and create its ConfigMap.
    ///
    /// A 409 on create is treated as a benign conflict. Sources that cannot be packaged
    /// are rejected before any cluster call.
    #[instrument(skip(self, content), fields(namespace = %self.namespace))]
    pub async fn build(&self, content: &str, language: Language) -> Result<PackageArtifact> {
        let artifact = PackageArtifact::prepare(content, language, &self.namespace)?;
        debug!(
            artifact = %artifact.name,
            filename = %artifact.filename,
            class_based = language.is_class_based(),
            "Prepared code artifact"
        );

        let config_map = artifact.to_config_map();
        match self
            .cluster
            .create_config_map(&artifact.namespace, &config_map)
            .await
        {
            Ok(_) => {
                info!(artifact = %artifact.name, "Created artifact ConfigMap");
            }
            Err(e) if is_conflict(&e) => {
                info!(artifact = %artifact.name, "Artifact ConfigMap already exists, reusing it");
            }
            Err(e) => {
                error!(artifact = %artifact.name, error = %e, "Failed to create artifact ConfigMap");
                return Err(RunnerError::ArtifactCreation {
                    name: artifact.name,
                    source: e,
                });
            }
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::error::api_error;
    use std::collections::HashSet;
    use std::sync::Arc;

    const JAVA_SOURCE: &str =
        "public class Greeter {\n  public static void main(String[] args) {\n    System.out.println(\"hi\");\n  }\n}\n";

    #[test]
    fn prepare_derives_filename_and_unique_name() {
        let artifact = PackageArtifact::prepare(JAVA_SOURCE, Language::Java21, "default").unwrap();
        assert_eq!(artifact.filename, "Greeter.java");
        assert!(artifact.name.starts_with(ARTIFACT_PREFIX));
        assert!(artifact.name.len() <= 63);
    }

    #[test]
    fn artifact_names_do_not_collide() {
        let names: HashSet<String> = (0..500)
            .map(|_| {
                PackageArtifact::prepare("print('hi')", Language::Python3, "default")
                    .unwrap()
                    .name
            })
            .collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn config_map_holds_source_under_filename() {
        let artifact = PackageArtifact::prepare("print('hi')", Language::Python3, "runs").unwrap();
        let cm = artifact.to_config_map();

        assert_eq!(cm.metadata.name.as_deref(), Some(artifact.name.as_str()));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("runs"));
        let data = cm.data.unwrap();
        assert_eq!(data.get("user_code.py").map(String::as_str), Some("print('hi')"));
        let labels = cm.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_LANGUAGE).map(String::as_str), Some("python3"));
    }

    #[tokio::test]
    async fn malformed_java_never_reaches_the_cluster() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_create_config_map().times(0);

        let builder = PackageBuilder::new(Arc::new(cluster), "default");
        let err = builder
            .build("class NotPublic {}", Language::Java21)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::MalformedSource(_)));
    }

    #[tokio::test]
    async fn conflict_on_create_is_benign() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_create_config_map()
            .times(1)
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));

        let builder = PackageBuilder::new(Arc::new(cluster), "default");
        let artifact = builder.build(JAVA_SOURCE, Language::Java21).await.unwrap();
        assert_eq!(artifact.filename, "Greeter.java");
    }

    #[tokio::test]
    async fn other_create_errors_are_fatal() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_create_config_map()
            .times(1)
            .returning(|_, _| Err(api_error(403, "Forbidden")));

        let builder = PackageBuilder::new(Arc::new(cluster), "default");
        let err = builder
            .build("print('hi')", Language::Python3)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ArtifactCreation { .. }));
    }

    #[tokio::test]
    async fn created_config_map_matches_artifact() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_create_config_map()
            .withf(|ns, cm| {
                ns == "default"
                    && cm
                        .data
                        .as_ref()
                        .is_some_and(|d| d.contains_key("Greeter.java"))
            })
            .times(1)
            .returning(|_, cm| Ok(cm.clone()));

        let builder = PackageBuilder::new(Arc::new(cluster), "default");
        builder.build(JAVA_SOURCE, Language::Java21).await.unwrap();
    }
}
