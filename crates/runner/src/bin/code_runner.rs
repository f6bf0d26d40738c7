/*
 * 5D Labs Code Runner - HTTP Service
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

//! Code Runner Service - runs submitted source files as Kubernetes Jobs
//!
//! Exposes `POST /run` plus health and readiness endpoints.

use anyhow::{Context, Result};
use clap::Parser;
use runner::cluster::ClusterSession;
use runner::server::{build_router, AppState};
use runner::{Orchestrator, RunnerConfig, TemplateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headroom on top of the polling bounds before the HTTP layer gives up
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "code-runner", version, about = "Run source files in ephemeral Kubernetes Jobs")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Namespace for artifacts and Jobs (overrides the configuration)
    #[arg(long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    info!(
        "Starting 5D Labs Code Runner v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = RunnerConfig::load(args.config.as_deref()).context("Invalid configuration")?;
    if let Some(namespace) = args.namespace {
        config.namespace = namespace;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;

    let templates = TemplateStore::load(&config.templates.directory)
        .with_context(|| {
            format!(
                "Failed to load job templates from {}",
                config.templates.directory.display()
            )
        })?;

    let session = ClusterSession::new();
    let cluster = session
        .connect()
        .await
        .context("Failed to connect to Kubernetes")?;

    let request_timeout = config.polling.pod_timeout()
        + config.polling.completion_timeout()
        + REQUEST_TIMEOUT_MARGIN;
    let orchestrator = Orchestrator::new(cluster, &config, Arc::new(templates));
    let app = build_router(AppState {
        orchestrator: Arc::new(orchestrator),
        request_timeout,
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(namespace = %config.namespace, "Code runner listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Code runner stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,runner=debug".into());
    let json = std::env::var("RUNNER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
