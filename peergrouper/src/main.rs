//! The peer group reconciliation controller.

mod address;
mod app;
mod applier;
mod config;
#[cfg(test)]
mod fixtures;
mod grpc;
mod planner;
#[cfg(test)]
mod planner_test;
mod server;
mod space;
mod store;
mod topology;
mod tracker;
mod worker;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        http_port = %cfg.http_port,
        namespace = %cfg.namespace,
        pod_name = %cfg.pod_name,
        store_endpoint = %cfg.store_endpoint,
        max_voters = %cfg.max_voters,
        ha_space = %cfg.desired_space(),
        "starting peergrouper",
    );

    // Setup metrics system.
    let recorder = PrometheusBuilder::new()
        .add_global_label("namespace", cfg.namespace.clone())
        .add_global_label("pod", cfg.pod_name.clone())
        .build();
    let metrics = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder)).context("error installing metrics recorder")?;

    let res = App::new(cfg, metrics).await?.spawn().await.context("error joining app task").and_then(|res| res);
    if let Err(err) = &res {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}
