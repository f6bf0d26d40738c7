/*
 * 5D Labs Code Runner - Ephemeral Kubernetes Jobs for User Code
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Code runner core library
//!
//! Packages a source file into a ConfigMap, runs it in a Job built from a
//! per-language template, waits for the pod to finish, returns its logs and
//! removes the transient resources.

pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod language;
pub mod monitor;
pub mod orchestrator;
pub mod package;
pub mod server;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use cluster::{ClusterApi, ClusterHandle, ClusterSession, KubeCluster};
pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use language::Language;
pub use orchestrator::{LanguageDetector, Orchestrator};
pub use template::TemplateStore;
pub use types::{ExecutionRequest, ExecutionResult, ExecutionStatus};
