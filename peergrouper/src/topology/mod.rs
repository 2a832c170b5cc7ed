//! Topology source abstractions.

mod k8s;

pub use k8s::{ControllerNodeWatcher, K8sTopology};

use anyhow::Result;
use tokio::sync::mpsc;

use peergrouper_core::models::NodeAddress;

/// A change notification emitted by a topology source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyEvent {
    /// The set of controller nodes changed, carrying the full new set of node IDs.
    NodeSetChanged(Vec<String>),
    /// The addresses or health of a single node changed.
    NodeChanged(String),
}

/// The source of controller node topology.
#[async_trait::async_trait]
pub trait TopologySource: Send + Sync + 'static {
    /// Open a stream of topology change notifications.
    ///
    /// The stream should only be opened once per source.
    async fn watch_controller_nodes(&self) -> Result<mpsc::UnboundedReceiver<TopologyEvent>>;

    /// The IDs of all current controller nodes.
    async fn controller_nodes(&self) -> Result<Vec<String>>;

    /// The ordered addresses of the given node.
    async fn node_addresses(&self, node_id: &str) -> Result<Vec<NodeAddress>>;

    /// Check if the given node is healthy & provisioned enough to hold a vote.
    async fn node_vote_eligible(&self, node_id: &str) -> Result<bool>;

    /// Publish the actual voting status of the given node.
    async fn set_has_vote(&self, node_id: &str, has_vote: bool) -> Result<()>;
}
