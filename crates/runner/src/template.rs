//! Job template instantiation.
//!
//! Templates are plain `batch/v1` Job manifests, one per language. Instantiating one
//! binds it to a freshly created artifact: a unique name, the artifact's ConfigMap as
//! the code volume and a language-specific entry command.

use crate::config::{JobConfig, TemplateConfig};
use crate::error::{Result, RunnerError};
use crate::language::Language;
use crate::package::{PackageArtifact, LABEL_COMPONENT, LABEL_LANGUAGE, LABEL_MANAGED_BY, MANAGED_BY};
use k8s_openapi::api::batch::v1::Job;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const MAX_K8S_NAME_LENGTH: usize = 63;
const NAME_TOKEN_LENGTH: usize = 12;

/// Label linking a Job back to its artifact ConfigMap
pub const LABEL_ARTIFACT: &str = "code-runner/artifact";

const EMBEDDED_PYTHON3_TEMPLATE: &str = include_str!("../../../templates/jobs/python3-job.yaml");
const EMBEDDED_JAVA21_TEMPLATE: &str = include_str!("../../../templates/jobs/java21-job.yaml");

fn embedded_template(language: Language) -> &'static str {
    match language {
        Language::Python3 => EMBEDDED_PYTHON3_TEMPLATE,
        Language::Java21 => EMBEDDED_JAVA21_TEMPLATE,
    }
}

/// Static Job manifest for one language.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub language: Language,
    pub base_name: String,
    manifest: Value,
}

impl JobTemplate {
    /// Parse and sanity-check a YAML Job manifest.
    pub fn from_yaml(language: Language, yaml: &str) -> Result<Self> {
        let manifest: Value = serde_yaml::from_str(yaml)?;

        // Must be a well-formed Job before we start patching it
        let job: Job = serde_json::from_value(manifest.clone())?;
        let base_name = job.metadata.name.clone().ok_or_else(|| {
            RunnerError::Template(format!("{language} template has no metadata.name"))
        })?;

        if manifest["spec"]["template"]["spec"]["containers"]
            .as_array()
            .is_none_or(Vec::is_empty)
        {
            return Err(RunnerError::Template(format!(
                "{language} template has no containers"
            )));
        }

        Ok(Self {
            language,
            base_name,
            manifest,
        })
    }
}

/// Templates keyed by language.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<Language, JobTemplate>,
}

impl TemplateStore {
    /// Load `<language>-job.yaml` from `directory`, using the built-in manifest for any
    /// language without a file there.
    pub fn load(directory: &Path) -> Result<Self> {
        let mut templates = HashMap::new();
        for language in Language::ALL {
            let path = directory.join(language.template_file());
            let template = if path.is_file() {
                let yaml = std::fs::read_to_string(&path)?;
                info!(language = %language, path = %path.display(), "Loaded job template");
                JobTemplate::from_yaml(language, &yaml)?
            } else {
                debug!(language = %language, "No template file found, using built-in template");
                JobTemplate::from_yaml(language, embedded_template(language))?
            };
            templates.insert(language, template);
        }
        Ok(Self { templates })
    }

    /// Only the built-in manifests
    pub fn builtin() -> Result<Self> {
        let mut templates = HashMap::new();
        for language in Language::ALL {
            templates.insert(
                language,
                JobTemplate::from_yaml(language, embedded_template(language))?,
            );
        }
        Ok(Self { templates })
    }

    pub fn get(&self, language: Language) -> Result<&JobTemplate> {
        self.templates
            .get(&language)
            .ok_or_else(|| RunnerError::Template(format!("no job template for {language}")))
    }
}

/// A Job bound to one artifact, ready for submission.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub generated_name: String,
    pub namespace: String,
    pub artifact_name: String,
    pub entry_command: Vec<String>,
    pub language: Language,
    pub job: Job,
}

/// Binds templates to artifacts.
#[derive(Debug, Clone)]
pub struct JobInstantiator {
    templates: TemplateConfig,
    job: JobConfig,
}

impl JobInstantiator {
    #[must_use]
    pub fn new(templates: TemplateConfig, job: JobConfig) -> Self {
        Self { templates, job }
    }

    #[instrument(skip(self, template, artifact), fields(artifact = %artifact.name))]
    pub fn instantiate(
        &self,
        template: &JobTemplate,
        artifact: &PackageArtifact,
        language: Language,
    ) -> Result<JobSpec> {
        if template.language != language || artifact.language != language {
            return Err(RunnerError::Template(format!(
                "template for {} cannot run {language} artifact",
                template.language
            )));
        }

        let mut manifest = template.manifest.clone();
        let generated_name = generate_job_name(&template.base_name);

        manifest["metadata"]["name"] = json!(generated_name);
        manifest["metadata"]["namespace"] = json!(artifact.namespace);
        merge_labels(&mut manifest["metadata"], artifact);
        merge_labels(&mut manifest["spec"]["template"]["metadata"], artifact);

        let volume_name = self.bind_code_volume(&mut manifest, &artifact.name, language)?;
        let mount_path = mount_path_for(&manifest, &volume_name)
            .unwrap_or_else(|| self.templates.mount_path.clone());

        let entry_command =
            language.entry_command(&artifact.filename, &mount_path, &self.templates.work_dir);
        let container = &mut manifest["spec"]["template"]["spec"]["containers"][0];
        container["command"] = json!(entry_command);
        if let Some(obj) = container.as_object_mut() {
            obj.remove("args");
        }

        let spec = &mut manifest["spec"];
        if spec.get("backoffLimit").is_none() {
            spec["backoffLimit"] = json!(0);
        }
        if spec.get("activeDeadlineSeconds").is_none() {
            spec["activeDeadlineSeconds"] = json!(self.job.active_deadline_seconds);
        }
        if spec.get("ttlSecondsAfterFinished").is_none() {
            spec["ttlSecondsAfterFinished"] = json!(self.job.ttl_seconds_after_finished);
        }

        let job: Job = serde_json::from_value(manifest)?;
        debug!(job = %generated_name, volume = %volume_name, "Instantiated job template");

        Ok(JobSpec {
            generated_name,
            namespace: artifact.namespace.clone(),
            artifact_name: artifact.name.clone(),
            entry_command,
            language,
            job,
        })
    }

    /// Point the template's code volume at the artifact ConfigMap, returning the volume name.
    fn bind_code_volume(
        &self,
        manifest: &mut Value,
        artifact_name: &str,
        language: Language,
    ) -> Result<String> {
        let volumes = manifest["spec"]["template"]["spec"]["volumes"]
            .as_array_mut()
            .ok_or_else(|| RunnerError::Template(format!("{language} template has no volumes")))?;

        let wanted = self.templates.code_volume.as_deref();
        let volume = volumes
            .iter_mut()
            .find(|v| {
                v.get("configMap").is_some()
                    && wanted.is_none_or(|name| v["name"].as_str() == Some(name))
            })
            .ok_or_else(|| {
                RunnerError::Template(format!(
                    "{language} template has no ConfigMap volume{}",
                    wanted.map(|n| format!(" named {n}")).unwrap_or_default()
                ))
            })?;

        volume["configMap"]["name"] = json!(artifact_name);
        Ok(volume["name"].as_str().unwrap_or_default().to_string())
    }
}

fn mount_path_for(manifest: &Value, volume_name: &str) -> Option<String> {
    manifest["spec"]["template"]["spec"]["containers"][0]["volumeMounts"]
        .as_array()?
        .iter()
        .find(|m| m["name"].as_str() == Some(volume_name))
        .and_then(|m| m["mountPath"].as_str())
        .map(str::to_string)
}

fn merge_labels(metadata: &mut Value, artifact: &PackageArtifact) {
    if !metadata["labels"].is_object() {
        metadata["labels"] = json!({});
    }
    let labels = &mut metadata["labels"];
    labels[LABEL_MANAGED_BY] = json!(MANAGED_BY);
    labels[LABEL_COMPONENT] = json!("job");
    labels[LABEL_LANGUAGE] = json!(artifact.language.as_str());
    labels[LABEL_ARTIFACT] = json!(artifact.name);
}

/// `<base>-<token>`, trimmed so the whole name is a valid DNS label.
fn generate_job_name(base: &str) -> String {
    let token: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(NAME_TOKEN_LENGTH)
        .collect();
    let available = MAX_K8S_NAME_LENGTH - NAME_TOKEN_LENGTH - 1;
    let base: String = base.to_lowercase().chars().take(available).collect();
    let base = base.trim_end_matches('-');
    format!("{base}-{token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn instantiator() -> JobInstantiator {
        JobInstantiator::new(TemplateConfig::default(), JobConfig::default())
    }

    fn python_artifact() -> PackageArtifact {
        PackageArtifact::prepare("print(\"hi\")", Language::Python3, "sandbox").unwrap()
    }

    fn java_artifact() -> PackageArtifact {
        PackageArtifact::prepare("public class Main { }", Language::Java21, "sandbox").unwrap()
    }

    #[test]
    fn builtin_templates_cover_every_language() {
        let store = TemplateStore::builtin().unwrap();
        for language in Language::ALL {
            let template = store.get(language).unwrap();
            assert_eq!(template.language, language);
            assert!(template.base_name.starts_with(language.as_str()));
        }
    }

    #[test]
    fn python_job_runs_mounted_file() {
        let store = TemplateStore::builtin().unwrap();
        let artifact = python_artifact();
        let spec = instantiator()
            .instantiate(store.get(Language::Python3).unwrap(), &artifact, Language::Python3)
            .unwrap();

        assert_eq!(spec.entry_command, vec!["python3", "/mnt/config/user_code.py"]);
        assert_eq!(spec.namespace, "sandbox");
        assert_eq!(spec.artifact_name, artifact.name);
        assert!(spec.generated_name.starts_with("python3-job-"));

        let job = spec.job;
        assert_eq!(job.metadata.name.as_deref(), Some(spec.generated_name.as_str()));
        assert_eq!(job.metadata.namespace.as_deref(), Some("sandbox"));
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_ARTIFACT), Some(&artifact.name));

        let job_value = serde_json::to_value(job.spec.unwrap()).unwrap();
        let pod_spec = &job_value["template"]["spec"];
        assert_eq!(pod_spec["volumes"][0]["configMap"]["name"], json!(artifact.name));
        assert_eq!(
            pod_spec["containers"][0]["command"],
            json!(["python3", "/mnt/config/user_code.py"])
        );
    }

    #[test]
    fn java_job_compiles_in_work_dir() {
        let store = TemplateStore::builtin().unwrap();
        let spec = instantiator()
            .instantiate(store.get(Language::Java21).unwrap(), &java_artifact(), Language::Java21)
            .unwrap();

        assert_eq!(spec.entry_command[0], "/bin/sh");
        assert_eq!(
            spec.entry_command[2],
            "cp /mnt/config/Main.java /tmp/ && cd /tmp/ && javac Main.java && java Main"
        );
    }

    #[test]
    fn mount_path_follows_template_volume_mount() {
        let yaml = r"
apiVersion: batch/v1
kind: Job
metadata:
  name: py
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: runner
          image: python:3.12-slim
          args: [ignored]
          volumeMounts:
            - name: scratch
              mountPath: /scratch
            - name: src
              mountPath: /src
      volumes:
        - name: scratch
          emptyDir: {}
        - name: src
          configMap:
            name: placeholder
";
        let template = JobTemplate::from_yaml(Language::Python3, yaml).unwrap();
        let artifact = python_artifact();
        let spec = instantiator()
            .instantiate(&template, &artifact, Language::Python3)
            .unwrap();

        assert_eq!(spec.entry_command, vec!["python3", "/src/user_code.py"]);
        let job_spec = serde_json::to_value(spec.job.spec.unwrap()).unwrap();
        assert_eq!(job_spec["template"]["spec"]["volumes"][1]["configMap"]["name"], json!(artifact.name));
        assert!(job_spec["template"]["spec"]["containers"][0].get("args").is_none());
        assert_eq!(job_spec["backoffLimit"], json!(0));
        assert_eq!(job_spec["activeDeadlineSeconds"], json!(600));
        assert_eq!(job_spec["ttlSecondsAfterFinished"], json!(300));
    }

    #[test]
    fn template_without_configmap_volume_is_rejected() {
        let yaml = r"
apiVersion: batch/v1
kind: Job
metadata:
  name: py
spec:
  template:
    spec:
      containers:
        - name: runner
          image: python:3.12-slim
      volumes:
        - name: scratch
          emptyDir: {}
";
        let template = JobTemplate::from_yaml(Language::Python3, yaml).unwrap();
        let err = instantiator()
            .instantiate(&template, &python_artifact(), Language::Python3)
            .unwrap_err();
        assert!(matches!(err, RunnerError::Template(_)));
    }

    #[test]
    fn template_without_name_is_rejected() {
        let yaml = "apiVersion: batch/v1\nkind: Job\nmetadata: {}\nspec:\n  template:\n    spec:\n      containers: []\n";
        assert!(JobTemplate::from_yaml(Language::Python3, yaml).is_err());
    }

    #[test]
    fn language_mismatch_is_rejected() {
        let store = TemplateStore::builtin().unwrap();
        let err = instantiator()
            .instantiate(store.get(Language::Java21).unwrap(), &python_artifact(), Language::Python3)
            .unwrap_err();
        assert!(matches!(err, RunnerError::Template(_)));
    }

    #[test]
    fn generated_names_are_unique_and_bounded() {
        let store = TemplateStore::builtin().unwrap();
        let template = store.get(Language::Python3).unwrap();
        let artifact = python_artifact();
        let names: HashSet<String> = (0..200)
            .map(|_| {
                instantiator()
                    .instantiate(template, &artifact, Language::Python3)
                    .unwrap()
                    .generated_name
            })
            .collect();

        assert_eq!(names.len(), 200);
        assert!(names.iter().all(|n| n.len() <= MAX_K8S_NAME_LENGTH));
    }

    #[test]
    fn long_base_names_are_trimmed() {
        let name = generate_job_name(&"x".repeat(80));
        assert_eq!(name.len(), MAX_K8S_NAME_LENGTH);
        assert!(name.starts_with("xxxx"));
    }

    #[test]
    fn load_prefers_directory_templates() {
        let dir = tempfile::tempdir().unwrap();
        let custom = EMBEDDED_PYTHON3_TEMPLATE.replace("name: python3-job", "name: custom-py");
        std::fs::write(dir.path().join("python3-job.yaml"), custom).unwrap();

        let store = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(store.get(Language::Python3).unwrap().base_name, "custom-py");
        assert_eq!(store.get(Language::Java21).unwrap().base_name, "java21-job");
    }
}
