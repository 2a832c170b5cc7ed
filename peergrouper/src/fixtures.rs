//! In-memory collaborators used across the test suite.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;

use peergrouper_core::models::{MemberId, NodeAddress, PeerGroupConfig, ReplicaSetMember, Scope};

use crate::store::ConsensusStore;
use crate::topology::{TopologyEvent, TopologySource};
use crate::tracker::ControllerTracker;

/// The store port used throughout tests.
pub const PORT: u16 = 666;

/// A tracker for node `id` with a single cloud-local address `10.0.0.{id}`.
pub fn cloud_tracker(id: u32, eligible: bool) -> ControllerTracker {
    ControllerTracker::new(id.to_string(), vec![cloud_addr(id)], eligible, id as u64)
}

pub fn cloud_addr(id: u32) -> NodeAddress {
    NodeAddress::new(format!("10.0.0.{}", id), Scope::CloudLocal)
}

/// A member for node `id` at its cloud-local address.
pub fn member(id: MemberId, node_id: u32, votes: u8, priority: f64) -> ReplicaSetMember {
    ReplicaSetMember {
        id,
        address: cloud_addr(node_id).host_port(PORT),
        node_id: Some(node_id.to_string()),
        votes,
        priority,
    }
}

#[derive(Clone, Debug)]
struct MemNode {
    addresses: Vec<NodeAddress>,
    eligible: bool,
}

/// An in-memory topology source.
#[derive(Default)]
pub struct MemTopology {
    nodes: Mutex<BTreeMap<String, MemNode>>,
    votes: Mutex<HashMap<String, bool>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TopologyEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TopologyEvent>>>,
    fail_reads: AtomicBool,
}

impl MemTopology {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            ..Default::default()
        })
    }

    /// Add a node without emitting an event.
    pub fn seed_node(&self, id: &str, addresses: Vec<NodeAddress>, eligible: bool) {
        self.nodes.lock().unwrap().insert(id.into(), MemNode { addresses, eligible });
    }

    /// Add a node and emit a node set change.
    pub fn add_node(&self, id: &str, addresses: Vec<NodeAddress>, eligible: bool) {
        self.seed_node(id, addresses, eligible);
        self.emit_node_set();
    }

    /// Remove a node and emit a node set change.
    pub fn remove_node(&self, id: &str) {
        self.nodes.lock().unwrap().remove(id);
        self.emit_node_set();
    }

    /// Update a node's addresses and emit a node change.
    pub fn set_addresses(&self, id: &str, addresses: Vec<NodeAddress>) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(id) {
            node.addresses = addresses;
        }
        self.emit(TopologyEvent::NodeChanged(id.into()));
    }

    /// Update a node's vote eligibility and emit a node change.
    pub fn set_eligible(&self, id: &str, eligible: bool) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(id) {
            node.eligible = eligible;
        }
        self.emit(TopologyEvent::NodeChanged(id.into()));
    }

    /// Make every read of the topology fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Close the event stream.
    pub fn close_events(&self) {
        self.events_tx.lock().unwrap().take();
    }

    /// The voting status published for each node.
    pub fn published_votes(&self) -> HashMap<String, bool> {
        self.votes.lock().unwrap().clone()
    }

    fn emit(&self, event: TopologyEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn emit_node_set(&self) {
        let ids = self.nodes.lock().unwrap().keys().cloned().collect();
        self.emit(TopologyEvent::NodeSetChanged(ids));
    }

    fn node(&self, id: &str) -> Result<MemNode> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("topology unavailable");
        }
        self.nodes.lock().unwrap().get(id).cloned().ok_or_else(|| anyhow!("node {} not found", id))
    }
}

#[async_trait::async_trait]
impl TopologySource for MemTopology {
    async fn watch_controller_nodes(&self) -> Result<mpsc::UnboundedReceiver<TopologyEvent>> {
        self.events_rx.lock().unwrap().take().ok_or_else(|| anyhow!("event stream already taken"))
    }

    async fn controller_nodes(&self) -> Result<Vec<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("topology unavailable");
        }
        Ok(self.nodes.lock().unwrap().keys().cloned().collect())
    }

    async fn node_addresses(&self, node_id: &str) -> Result<Vec<NodeAddress>> {
        Ok(self.node(node_id)?.addresses)
    }

    async fn node_vote_eligible(&self, node_id: &str) -> Result<bool> {
        Ok(self.node(node_id)?.eligible)
    }

    async fn set_has_vote(&self, node_id: &str, has_vote: bool) -> Result<()> {
        self.votes.lock().unwrap().insert(node_id.into(), has_vote);
        Ok(())
    }
}

/// An in-memory consensus store with failure & delay injection.
#[derive(Default)]
pub struct MemStore {
    config: Mutex<PeerGroupConfig>,
    primary: Mutex<Option<MemberId>>,
    submissions: Mutex<Vec<PeerGroupConfig>>,
    /// The number of upcoming submissions to reject.
    fail_submits: AtomicU32,
    /// Accept submissions without ever applying them.
    stall: AtomicBool,
    /// Fail every call.
    unreachable: AtomicBool,
    submit_delay: Mutex<Duration>,
    reads: AtomicUsize,
}

impl MemStore {
    pub fn new(config: PeerGroupConfig, primary: Option<MemberId>) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            primary: Mutex::new(primary),
            ..Default::default()
        })
    }

    /// Every configuration submitted so far, in order.
    pub fn submissions(&self) -> Vec<PeerGroupConfig> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn config(&self) -> PeerGroupConfig {
        self.config.lock().unwrap().clone()
    }

    /// Replace the store's configuration out of band.
    pub fn set_config(&self, config: PeerGroupConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn set_primary(&self, primary: Option<MemberId>) {
        *self.primary.lock().unwrap() = primary;
    }

    pub fn fail_next_submits(&self, count: u32) {
        self.fail_submits.store(count, Ordering::SeqCst);
    }

    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// The number of configuration reads served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConsensusStore for MemStore {
    async fn current_config(&self) -> Result<PeerGroupConfig> {
        self.check_reachable()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.config())
    }

    async fn submit_config(&self, config: &PeerGroupConfig) -> Result<()> {
        self.check_reachable()?;
        let delay = *self.submit_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        self.submissions.lock().unwrap().push(config.clone());
        let failures = self.fail_submits.load(Ordering::SeqCst);
        if failures > 0 {
            self.fail_submits.store(failures - 1, Ordering::SeqCst);
            bail!("submission rejected");
        }
        if self.stall.load(Ordering::SeqCst) {
            return Ok(());
        }
        *self.config.lock().unwrap() = config.clone();
        Ok(())
    }

    async fn primary(&self) -> Result<Option<MemberId>> {
        self.check_reachable()?;
        Ok(*self.primary.lock().unwrap())
    }
}
