//! A topology source backed by `ControllerNode` resources in K8s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use futures::stream::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;

use peergrouper_core::crd::{ControllerNode, RequiredMetadata};
use peergrouper_core::models::NodeAddress;

use crate::config::Config;
use crate::topology::{TopologyEvent, TopologySource};

const APP_NAME: &str = "peergrouper";
const API_TIMEOUT: Duration = Duration::from_secs(5);
const METRIC_NODES_WATCHER_ERRORS: &str = "peergrouper_controller_nodes_watcher_errors";

/// A map of all known ControllerNode CRs in the namespace, keyed by node ID.
pub type ControllerNodeCache = Arc<ArcSwap<HashMap<String, Arc<ControllerNode>>>>;

/// A result type used for CR events coming from K8s.
pub type ControllerNodeCREventResult = std::result::Result<Event<ControllerNode>, WatcherError>;

/// A K8s event watcher of ControllerNode CRs.
pub struct ControllerNodeWatcher {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,

    /// The cache of known nodes.
    nodes: ControllerNodeCache,
    /// The channel of topology events emitted from observed changes.
    events: mpsc::UnboundedSender<TopologyEvent>,
}

impl ControllerNodeWatcher {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown: broadcast::Receiver<()>) -> (Self, ControllerNodeCache, mpsc::UnboundedReceiver<TopologyEvent>) {
        let shutdown = BroadcastStream::new(shutdown);
        metrics::register_counter!(METRIC_NODES_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors from the controller nodes watcher");
        let nodes: ControllerNodeCache = Default::default();
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                config,
                shutdown,
                nodes: nodes.clone(),
                events,
            },
            nodes,
            events_rx,
        )
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let api: Api<ControllerNode> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let stream = watcher(api, ListParams::default());
        tokio::pin!(stream);

        tracing::info!("controller nodes CR watcher initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = stream.next() => self.handle_k8s_event(k8s_event_res).await,
                _ = self.shutdown.next() => break,
            }
        }

        Ok(())
    }

    /// Handle watcher events coming from K8s.
    #[tracing::instrument(level = "debug", skip(self, res))]
    async fn handle_k8s_event(&mut self, res: ControllerNodeCREventResult) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from k8s watch stream");
                metrics::increment_counter!(METRIC_NODES_WATCHER_ERRORS);
                let _ = tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(node) => {
                let id = node.name().to_string();
                if id.is_empty() {
                    return;
                }
                let mut nodes = self.nodes.load().as_ref().clone();
                let is_new = nodes.insert(id.clone(), Arc::new(node)).is_none();
                let event = if is_new {
                    tracing::debug!(node_id = %id, "adding new ControllerNode CR");
                    TopologyEvent::NodeSetChanged(nodes.keys().cloned().collect())
                } else {
                    TopologyEvent::NodeChanged(id)
                };
                self.nodes.store(Arc::new(nodes));
                let _res = self.events.send(event);
            }
            Event::Deleted(node) => {
                let mut nodes = self.nodes.load().as_ref().clone();
                if nodes.remove(node.name()).is_none() {
                    return;
                }
                tracing::debug!(node_id = %node.name(), "removing ControllerNode CR");
                let ids = nodes.keys().cloned().collect();
                self.nodes.store(Arc::new(nodes));
                let _res = self.events.send(TopologyEvent::NodeSetChanged(ids));
            }
            Event::Restarted(list) => {
                tracing::debug!("controller nodes CR watcher restarted");
                let nodes: HashMap<_, _> = list
                    .into_iter()
                    .filter(|node| !node.name().is_empty())
                    .map(|node| (node.name().to_string(), Arc::new(node)))
                    .collect();
                let ids = nodes.keys().cloned().collect();
                self.nodes.store(Arc::new(nodes));
                let _res = self.events.send(TopologyEvent::NodeSetChanged(ids));
            }
        }
    }
}

/// A topology source backed by the ControllerNode cache.
pub struct K8sTopology {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// The cache of known nodes, kept current by the `ControllerNodeWatcher`.
    nodes: ControllerNodeCache,
    /// The event stream of the watcher, handed out once.
    events: Mutex<Option<mpsc::UnboundedReceiver<TopologyEvent>>>,
}

impl K8sTopology {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, nodes: ControllerNodeCache, events: mpsc::UnboundedReceiver<TopologyEvent>) -> Self {
        Self {
            client,
            config,
            nodes,
            events: Mutex::new(Some(events)),
        }
    }

    fn node(&self, node_id: &str) -> Result<Arc<ControllerNode>> {
        self.nodes
            .load()
            .get(node_id)
            .cloned()
            .ok_or_else(|| anyhow!("controller node {:?} not found", node_id))
    }
}

#[async_trait::async_trait]
impl TopologySource for K8sTopology {
    async fn watch_controller_nodes(&self) -> Result<mpsc::UnboundedReceiver<TopologyEvent>> {
        self.events
            .lock()
            .map_err(|_| anyhow!("topology event stream lock poisoned"))?
            .take()
            .context("topology event stream already taken")
    }

    async fn controller_nodes(&self) -> Result<Vec<String>> {
        let mut ids: Vec<_> = self.nodes.load().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn node_addresses(&self, node_id: &str) -> Result<Vec<NodeAddress>> {
        Ok(self.node(node_id)?.spec.addresses.clone())
    }

    async fn node_vote_eligible(&self, node_id: &str) -> Result<bool> {
        Ok(self.node(node_id)?.is_vote_eligible())
    }

    /// Patch the `hasVote` status field of the given node, unless the cached resource already holds it.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn set_has_vote(&self, node_id: &str, has_vote: bool) -> Result<()> {
        if self.node(node_id)?.has_vote() == Some(has_vote) {
            return Ok(());
        }
        let api: Api<ControllerNode> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let patch = serde_json::json!({ "status": { "hasVote": has_vote } });
        let params = PatchParams {
            field_manager: Some(APP_NAME.into()),
            ..Default::default()
        };
        timeout(API_TIMEOUT, api.patch_status(node_id, &params, &Patch::Merge(&patch)))
            .await
            .context("timeout while updating controller node status")?
            .context("error updating controller node status")?;
        Ok(())
    }
}
