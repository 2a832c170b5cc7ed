//! The peer group reconciliation worker.
//!
//! The worker owns every `ControllerTracker`. It wakes on topology change notifications or on a
//! periodic re-check timer, plans a target configuration and drives the store toward it through
//! the `StoreApplier`. A failed cycle is recorded and retried on the next wake, unless the error
//! is fatal, in which case the worker transitions to `Failed` and reports the error from `wait`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use peergrouper_core::models::PeerGroupConfig;
use peergrouper_core::PeerGroupError;

use crate::address::potential_host_ports;
use crate::applier::{ApplyOutcome, StoreApplier};
use crate::config::Config;
use crate::planner::plan;
use crate::space::SpaceCatalog;
use crate::store::ConsensusStore;
use crate::topology::{TopologyEvent, TopologySource};
use crate::tracker::ControllerTracker;

const METRIC_CYCLES: &str = "peergrouper_cycles";
const METRIC_CYCLE_ERRORS: &str = "peergrouper_cycle_errors";
const METRIC_PLAN_NOOPS: &str = "peergrouper_plan_noops";
const METRIC_DEFERRED_NODES: &str = "peergrouper_deferred_nodes";
const METRIC_VOTERS: &str = "peergrouper_voters";
const METRIC_WORKER_STATE: &str = "peergrouper_worker_state";

/// The lifecycle state of the reconciliation worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Starting
    }
}

/// An immutable snapshot of the worker's reconciliation state.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    pub state: WorkerState,
    /// The last configuration confirmed to be held by the store.
    pub config: Option<PeerGroupConfig>,
    pub last_applied_version: Option<u64>,
    /// The error of the last cycle, cleared by a successful cycle.
    pub last_error: Option<String>,
    /// Nodes excluded from voting during the last cycle.
    pub deferred: Vec<String>,
    /// Every known `host:port` of each tracked node.
    pub host_ports: BTreeMap<String, Vec<String>>,
}

/// A shared handle to the worker's latest status snapshot.
pub type StatusHandle = Arc<ArcSwap<ReconciliationStatus>>;

/// A handle to a spawned reconciliation worker.
pub struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), PeerGroupError>>,
    status: StatusHandle,
}

impl WorkerHandle {
    /// Request the worker to stop.
    ///
    /// An in-flight store step is always finished before the worker exits.
    pub fn stop(&self) {
        let _res = self.stop_tx.send(true);
    }

    /// Wait for the worker to reach a terminal state.
    ///
    /// Returns `Ok` on a clean stop, or the error which ended the worker.
    pub async fn wait(self) -> Result<(), PeerGroupError> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(PeerGroupError::Internal(format!("error joining reconciliation worker: {}", err))),
        }
    }

    /// A shared handle to the worker's status.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// The last confirmed configuration and the last recorded error.
    pub fn current_config(&self) -> (Option<PeerGroupConfig>, Option<String>) {
        let status = self.status.load();
        (status.config.clone(), status.last_error.clone())
    }
}

/// The peer group reconciliation worker.
pub struct Worker {
    config: Arc<Config>,
    topology: Arc<dyn TopologySource>,
    store: Arc<dyn ConsensusStore>,
    spaces: Arc<dyn SpaceCatalog>,
    applier: StoreApplier,

    /// All tracked controller nodes, by node ID.
    trackers: BTreeMap<String, ControllerTracker>,
    /// The sequence number given to the next new tracker.
    next_seq: u64,
    /// The voting status last published for each node.
    published_votes: HashMap<String, bool>,
    /// The number of consecutive failed reads of the store's configuration.
    store_failures: u32,

    /// The stop signal.
    stop: watch::Receiver<bool>,
    /// A channel used for triggering application shutdown when the worker fails.
    shutdown_tx: broadcast::Sender<()>,
    status: StatusHandle,
}

impl Worker {
    /// Spawn a new worker.
    pub fn spawn(
        config: Arc<Config>, topology: Arc<dyn TopologySource>, store: Arc<dyn ConsensusStore>, spaces: Arc<dyn SpaceCatalog>, shutdown_tx: broadcast::Sender<()>,
    ) -> WorkerHandle {
        metrics::register_counter!(METRIC_CYCLES, metrics::Unit::Count, "peer group reconciliation cycles run");
        metrics::register_counter!(METRIC_CYCLE_ERRORS, metrics::Unit::Count, "peer group reconciliation cycles which ended in error");
        metrics::register_counter!(METRIC_PLAN_NOOPS, metrics::Unit::Count, "cycles which required no store change");
        metrics::register_gauge!(METRIC_DEFERRED_NODES, metrics::Unit::Count, "controller nodes excluded from voting in the last cycle");
        metrics::register_gauge!(METRIC_VOTERS, metrics::Unit::Count, "voting members of the last confirmed configuration");
        metrics::register_gauge!(METRIC_WORKER_STATE, "the reconciliation worker state: 0 starting, 1 running, 2 stopping, 3 stopped, 4 failed");

        let (stop_tx, stop) = watch::channel(false);
        let status = StatusHandle::default();
        let applier = StoreApplier::new(store.clone(), &config);
        let worker = Self {
            config,
            topology,
            store,
            spaces,
            applier,
            trackers: BTreeMap::new(),
            next_seq: 0,
            published_votes: HashMap::new(),
            store_failures: 0,
            stop,
            shutdown_tx,
            status: status.clone(),
        };
        let join = tokio::spawn(worker.run());
        WorkerHandle { stop_tx, join, status }
    }

    async fn run(mut self) -> Result<(), PeerGroupError> {
        self.set_state(WorkerState::Starting);
        let mut events = match self.topology.watch_controller_nodes().await {
            Ok(events) => events,
            Err(err) => return self.fail(PeerGroupError::Internal(format!("error opening topology event stream: {:#}", err))),
        };
        if let Err(err) = self.resync().await {
            self.record_error(&err);
        }
        self.set_state(WorkerState::Running);
        tracing::info!("peer group reconciliation worker running");

        let recheck_interval = self.config.recheck_interval();
        let recheck = tokio::time::sleep(recheck_interval);
        tokio::pin!(recheck);
        let mut cycle_res = self.run_cycle().await;
        loop {
            if let Err(err) = &cycle_res {
                if err.is_fatal() {
                    return self.fail(err.clone());
                }
            }
            // A stop which arrived during the cycle reports that cycle's result.
            if *self.stop.borrow() {
                return self.finish(cycle_res);
            }

            tokio::select! {
                res = self.stop.changed() => {
                    if res.is_err() || *self.stop.borrow() {
                        return self.finish(Ok(()));
                    }
                    continue;
                }
                event_opt = events.recv() => match event_opt {
                    Some(event) => self.handle_events(event, &mut events).await,
                    None => return self.fail(PeerGroupError::TopologyClosed),
                },
                _ = &mut recheck => {
                    tracing::debug!("periodic re-check of peer group");
                    if let Err(err) = self.resync().await {
                        self.record_error(&err);
                    }
                }
            }
            cycle_res = self.run_cycle().await;
            recheck.as_mut().reset(Instant::now() + recheck_interval);
        }
    }

    /// Transition to `Failed`, triggering application shutdown.
    fn fail(&self, err: PeerGroupError) -> Result<(), PeerGroupError> {
        tracing::error!(error = %err, "peer group reconciliation worker failed");
        self.record_error(&err);
        self.set_state(WorkerState::Failed);
        let _res = self.shutdown_tx.send(());
        Err(err)
    }

    /// Transition through `Stopping` to `Stopped`.
    fn finish(&self, res: Result<(), PeerGroupError>) -> Result<(), PeerGroupError> {
        self.set_state(WorkerState::Stopping);
        tracing::info!("peer group reconciliation worker stopping");
        self.set_state(WorkerState::Stopped);
        res
    }

    /// Apply a burst of topology events to the trackers.
    ///
    /// All pending events are drained first, so that a burst results in a single cycle.
    #[tracing::instrument(level = "debug", skip(self, first, events))]
    async fn handle_events(&mut self, first: TopologyEvent, events: &mut mpsc::UnboundedReceiver<TopologyEvent>) {
        let mut node_set = None;
        let mut changed = BTreeSet::new();
        let mut next = Some(first);
        let mut count = 0;
        while let Some(event) = next.take() {
            count += 1;
            match event {
                TopologyEvent::NodeSetChanged(ids) => node_set = Some(ids),
                TopologyEvent::NodeChanged(id) => {
                    changed.insert(id);
                }
            }
            match events.try_recv() {
                Ok(event) => next = Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => (),
            }
        }
        tracing::debug!(count, "coalesced topology events");

        if let Some(ids) = node_set {
            let ids: BTreeSet<String> = ids.into_iter().collect();
            self.retain_trackers(&ids);
            for id in ids.iter() {
                if !self.trackers.contains_key(id) {
                    changed.insert(id.clone());
                }
            }
        }
        for id in changed {
            if let Err(err) = self.refresh_tracker(&id).await {
                tracing::warn!(node_id = %id, error = ?err, "error refreshing controller node, keeping last known state");
            }
        }
    }

    /// Rebuild all trackers from the topology source.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resync(&mut self) -> Result<(), PeerGroupError> {
        let ids: BTreeSet<String> = self
            .topology
            .controller_nodes()
            .await
            .map_err(|err| PeerGroupError::Unavailable {
                collaborator: "topology source".into(),
                reason: format!("{:#}", err),
            })?
            .into_iter()
            .collect();
        self.retain_trackers(&ids);
        for id in ids.iter() {
            if let Err(err) = self.refresh_tracker(id).await {
                tracing::warn!(node_id = %id, error = ?err, "error refreshing controller node, keeping last known state");
            }
        }
        Ok(())
    }

    /// Drop the trackers of nodes which are no longer part of the topology.
    fn retain_trackers(&mut self, ids: &BTreeSet<String>) {
        let removed: Vec<_> = self.trackers.keys().filter(|id| !ids.contains(*id)).cloned().collect();
        for id in removed {
            tracing::info!(node_id = %id, "controller node removed from topology");
            self.trackers.remove(&id);
            self.published_votes.remove(&id);
        }
    }

    /// Refresh the addresses & eligibility of a node, tracking it if it is new.
    async fn refresh_tracker(&mut self, id: &str) -> anyhow::Result<()> {
        let addresses = self.topology.node_addresses(id).await?;
        let eligible = self.topology.node_vote_eligible(id).await?;
        match self.trackers.get_mut(id) {
            Some(tracker) => {
                if tracker.set_addresses(addresses) {
                    tracing::debug!(node_id = %id, "controller node addresses changed");
                }
                if tracker.set_vote_eligible(eligible) {
                    tracing::debug!(node_id = %id, eligible, "controller node vote eligibility changed");
                }
            }
            None => {
                tracing::info!(node_id = %id, eligible, "tracking new controller node");
                let tracker = ControllerTracker::new(id, addresses, eligible, self.next_seq);
                self.next_seq += 1;
                self.trackers.insert(id.into(), tracker);
            }
        }
        Ok(())
    }

    /// Run a single plan & apply cycle, recording its outcome.
    async fn run_cycle(&mut self) -> Result<(), PeerGroupError> {
        metrics::increment_counter!(METRIC_CYCLES);
        let res = self.cycle().await;
        match &res {
            Ok(()) => {
                self.status.rcu(|status| ReconciliationStatus {
                    last_error: None,
                    ..status.as_ref().clone()
                });
            }
            Err(err) => {
                tracing::error!(error = %err, "peer group reconciliation cycle failed");
                metrics::increment_counter!(METRIC_CYCLE_ERRORS);
                self.record_error(err);
            }
        };
        res
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn cycle(&mut self) -> Result<(), PeerGroupError> {
        let desired = self.spaces.desired_ha_space().await.map_err(|err| PeerGroupError::Unavailable {
            collaborator: "space catalog".into(),
            reason: format!("{:#}", err),
        })?;
        let observed = match self.store.current_config().await {
            Ok(observed) => {
                self.store_failures = 0;
                observed
            }
            Err(err) => {
                self.store_failures += 1;
                let reason = format!("{:#}", err);
                if self.store_failures >= self.config.store_unreachable_limit {
                    return Err(PeerGroupError::StoreUnreachable {
                        attempts: self.store_failures,
                        reason,
                    });
                }
                return Err(PeerGroupError::Unavailable {
                    collaborator: "consensus store".into(),
                    reason,
                });
            }
        };
        let primary = self.store.primary().await.unwrap_or_else(|err| {
            tracing::debug!(error = ?err, "primary unknown, planning without it");
            None
        });

        let trackers: Vec<_> = self.trackers.values().cloned().collect();
        let host_ports: BTreeMap<_, _> = trackers
            .iter()
            .map(|tracker| (tracker.id().to_string(), potential_host_ports(tracker, self.config.store_port)))
            .collect();
        let outcome = plan(&observed, primary, &trackers, &desired, self.config.store_port, self.config.max_voters)?;
        for err in outcome.deferred.iter() {
            tracing::warn!(error = %err, "controller node deferred from voting");
        }
        let deferred: Vec<_> = outcome.deferred.iter().map(|err| err.to_string()).collect();
        metrics::gauge!(METRIC_DEFERRED_NODES, deferred.len() as f64);
        self.status.rcu(|status| ReconciliationStatus {
            deferred: deferred.clone(),
            host_ports: host_ports.clone(),
            ..status.as_ref().clone()
        });

        let mut target = outcome.target;
        if outcome.changed {
            tracing::info!(
                observed_version = observed.version,
                voters = target.voter_count(),
                members = target.members.len(),
                "peer group changed, applying new configuration"
            );
            match self.applier.apply(&target, &self.stop).await? {
                ApplyOutcome::Completed { steps, version } => {
                    tracing::info!(steps, version, "peer group configuration applied");
                    target.version = version;
                }
                ApplyOutcome::Interrupted { steps_done, total } => {
                    tracing::info!(steps_done, total, "peer group apply interrupted by stop");
                    return Ok(());
                }
            }
        } else {
            tracing::debug!(version = observed.version, "peer group unchanged");
            metrics::increment_counter!(METRIC_PLAN_NOOPS);
        }

        self.publish_votes(&target).await;
        metrics::gauge!(METRIC_VOTERS, target.voter_count() as f64);
        let version = target.version;
        self.status.rcu(|status| ReconciliationStatus {
            config: Some(target.clone()),
            last_applied_version: Some(version),
            ..status.as_ref().clone()
        });
        Ok(())
    }

    /// Publish the voting status of every tracked node whose status changed.
    async fn publish_votes(&mut self, confirmed: &PeerGroupConfig) {
        for id in self.trackers.keys() {
            let has_vote = confirmed.member_for_node(id).map(|member| member.is_voter()).unwrap_or(false);
            if self.published_votes.get(id) == Some(&has_vote) {
                continue;
            }
            match self.topology.set_has_vote(id, has_vote).await {
                Ok(()) => {
                    self.published_votes.insert(id.clone(), has_vote);
                }
                Err(err) => tracing::warn!(node_id = %id, has_vote, error = ?err, "error publishing controller node vote status"),
            }
        }
    }

    fn record_error(&self, err: &PeerGroupError) {
        let last_error = Some(err.to_string());
        self.status.rcu(|status| ReconciliationStatus {
            last_error: last_error.clone(),
            ..status.as_ref().clone()
        });
    }

    fn set_state(&self, state: WorkerState) {
        metrics::gauge!(METRIC_WORKER_STATE, state as u8 as f64);
        self.status.rcu(|status| ReconciliationStatus {
            state,
            ..status.as_ref().clone()
        });
    }
}
