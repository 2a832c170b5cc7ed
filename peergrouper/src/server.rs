//! The HTTP status, healthcheck & metrics server.

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Json, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::worker::{ReconciliationStatus, StatusHandle, WorkerState};

/// Spawns the HTTP server exposing `/health`, `/status` & `/metrics`.
pub fn spawn_http_server(config: &Config, metrics: PrometheusHandle, status: StatusHandle, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(reconciliation_status))
        .route("/metrics", get(prometheus_scrape))
        .layer(AddExtensionLayer::new(metrics))
        .layer(AddExtensionLayer::new(status));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.http_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("http server is listening at 0.0.0.0:{}", config.http_port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

/// Healthy while the reconciliation worker is starting or running.
pub(crate) async fn health(Extension(status): Extension<StatusHandle>) -> StatusCode {
    match status.load().state {
        WorkerState::Starting | WorkerState::Running => StatusCode::OK,
        WorkerState::Stopping | WorkerState::Stopped | WorkerState::Failed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Render the worker's latest reconciliation status.
pub(crate) async fn reconciliation_status(Extension(status): Extension<StatusHandle>) -> Json<ReconciliationStatus> {
    Json(status.load().as_ref().clone())
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(state): Extension<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.render())
}
