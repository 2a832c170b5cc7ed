use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::server::spawn_http_server;
use crate::space::StaticSpaceCatalog;
use crate::store::GrpcStore;
use crate::topology::{ControllerNodeWatcher, K8sTopology};
use crate::worker::{Worker, WorkerHandle};

/// The application object for when the peergrouper is running as a server.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The handle of the peer group reconciliation worker.
    worker: WorkerHandle,
    /// The join handle of the ControllerNode CR watcher.
    watcher_handle: JoinHandle<Result<()>>,
    /// The join handle of the HTTP server.
    http_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: PrometheusHandle) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(10);

        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;

        // Spawn various core tasks.
        let (watcher, nodes, events_rx) = ControllerNodeWatcher::new(client.clone(), config.clone(), shutdown_tx.subscribe());
        let watcher_handle = watcher.spawn();
        let topology = Arc::new(K8sTopology::new(client, config.clone(), nodes, events_rx));

        let store = Arc::new(GrpcStore::new(&config).context("error building consensus store client")?);
        let spaces = Arc::new(StaticSpaceCatalog::from_config(&config));
        let worker = Worker::spawn(config.clone(), topology, store, spaces, shutdown_tx.clone());

        let http_server = spawn_http_server(&config, metrics, worker.status_handle(), shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            worker,
            watcher_handle,
            http_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine. The worker finishes any in-flight store step before the
        // remaining tasks are told to stop.
        tracing::debug!("peergrouper is shutting down");
        self.worker.stop();
        let worker_res = self.worker.wait().await;
        if let Err(err) = &worker_res {
            tracing::error!(error = %err, "peer group reconciliation worker ended in error");
        }
        let _ = self.shutdown_tx.send(());

        if let Err(err) = self.watcher_handle.await.context("error joining ControllerNode watcher handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down ControllerNode watcher");
        }
        if let Err(err) = self.http_server.await.context("error joining http server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down http server");
        }

        tracing::debug!("peergrouper shutdown complete");
        worker_res.context("peer group reconciliation failed")
    }
}
