//! Supported languages and everything that varies per language.

use crate::error::{Result, RunnerError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    /// First public class declaration, e.g. `public class Main`
    static ref PUBLIC_CLASS_PATTERN: Regex =
        Regex::new(r"public\s+class\s+(\w+)").unwrap();
}

/// Fixed in-cluster filename for Python sources.
pub const PYTHON_FILENAME: &str = "user_code.py";

/// Languages the runner can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "python3")]
    Python3,
    #[serde(rename = "java21")]
    Java21,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python3, Language::Java21];

    /// Wire name, also used in labels and template filenames.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python3 => "python3",
            Language::Java21 => "java21",
        }
    }

    /// Filename of the Job manifest for this language.
    #[must_use]
    pub fn template_file(self) -> &'static str {
        match self {
            Language::Python3 => "python3-job.yaml",
            Language::Java21 => "java21-job.yaml",
        }
    }

    /// Whether the entry point name must match the file name.
    #[must_use]
    pub fn is_class_based(self) -> bool {
        match self {
            Language::Python3 => false,
            Language::Java21 => true,
        }
    }

    /// Derive the filename the source is stored under inside the ConfigMap.
    pub fn source_filename(self, source: &str) -> Result<String> {
        match self {
            Language::Python3 => Ok(PYTHON_FILENAME.to_string()),
            Language::Java21 => {
                let class_name = public_class_name(source).ok_or_else(|| {
                    RunnerError::MalformedSource(
                        "no `public class` declaration found in java21 source".to_string(),
                    )
                })?;
                Ok(format!("{class_name}.java"))
            }
        }
    }

    /// Container command that runs (or compiles then runs) the mounted file.
    ///
    /// The mount point is read-only, so compiled sources are copied to `work_dir` first.
    #[must_use]
    pub fn entry_command(self, filename: &str, mount_path: &str, work_dir: &str) -> Vec<String> {
        let mount_path = mount_path.trim_end_matches('/');
        let work_dir = work_dir.trim_end_matches('/');
        match self {
            Language::Python3 => vec!["python3".to_string(), format!("{mount_path}/{filename}")],
            Language::Java21 => {
                let stem = file_stem(filename);
                vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "cp {mount_path}/{filename} {work_dir}/ && cd {work_dir}/ && javac {filename} && java {stem}"
                    ),
                ]
            }
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python3" | "python" => Ok(Language::Python3),
            "java21" | "java" => Ok(Language::Java21),
            other => Err(RunnerError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Name of the first `public class` declared in `source`.
#[must_use]
pub fn public_class_name(source: &str) -> Option<&str> {
    PUBLIC_CLASS_PATTERN
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn file_stem(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}
