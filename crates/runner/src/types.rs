//! Request and result types shared by the orchestrator and the HTTP layer.

use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One run request, immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: Option<Language>,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(source_code: impl Into<String>, language: Option<Language>) -> Self {
        Self {
            source_code: source_code.into(),
            language,
        }
    }
}

/// Terminal outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::TimedOut => "TimedOut",
            ExecutionStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller gets back. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub log: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Request refused before any cluster mutation
    #[must_use]
    pub fn rejected(description: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            log: String::new(),
            description: description.into(),
            job_name: None,
            pod_name: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Wall-clock duration of the execution
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
