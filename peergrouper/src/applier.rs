//! Driving the live consensus store toward a target configuration.
//!
//! A target is never submitted in one jump. The difference between the observed and the target
//! configuration is decomposed into steps which each add or remove exactly one voter, and every
//! step is confirmed by reading back the store's configuration before the next is submitted.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::sync::watch;
use tokio::time::Instant;

use peergrouper_core::models::{MemberId, PeerGroupConfig, ReplicaSetMember};
use peergrouper_core::PeerGroupError;

use crate::config::Config;
use crate::store::ConsensusStore;

const METRIC_APPLY_STEPS: &str = "peergrouper_apply_steps";
const METRIC_APPLY_STEP_RETRIES: &str = "peergrouper_apply_step_retries";
const METRIC_APPLY_FAILURES: &str = "peergrouper_apply_failures";

/// The membership change made by a single step.
#[derive(Clone, Debug, PartialEq)]
pub enum StepChange {
    /// A member gains a vote, joining the configuration if needed.
    AddVoter { member_id: MemberId, node_id: Option<String> },
    /// A member loses its vote, leaving the configuration if it is not a target member.
    RemoveVoter { member_id: MemberId, node_id: Option<String> },
    /// Only non-voting changes: non-voter membership, addresses or priorities.
    Reconfigure,
}

impl std::fmt::Display for StepChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddVoter { member_id, node_id } => write!(f, "add voter {} (node {})", member_id, node_id.as_deref().unwrap_or("<none>")),
            Self::RemoveVoter { member_id, node_id } => write!(f, "remove voter {} (node {})", member_id, node_id.as_deref().unwrap_or("<none>")),
            Self::Reconfigure => write!(f, "reconfigure non-voting members"),
        }
    }
}

/// One configuration to be submitted and confirmed.
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyStep {
    /// The 1-based position of this step.
    pub index: usize,
    pub change: StepChange,
    /// The full configuration to submit.
    pub config: PeerGroupConfig,
}

/// The result of a completed or interrupted apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every step was confirmed, leaving the store at `version`.
    Completed { steps: usize, version: u64 },
    /// A stop was requested at a step boundary.
    Interrupted { steps_done: usize, total: usize },
}

/// Decompose the transition from `observed` to `target` into single-voter steps.
///
/// Voters are added first while the voter count is below `max_voters`, otherwise removed first.
/// The primary is removed as soon as the remaining voters still form a majority of the current
/// voter set, else after the other removals; when even then no majority would remain the
/// transition is refused. Step versions count up from `observed.version + 1`.
pub fn plan_steps(observed: &PeerGroupConfig, target: &PeerGroupConfig, primary: Option<MemberId>, max_voters: usize) -> Result<Vec<ApplyStep>, PeerGroupError> {
    if target.voter_count() > max_voters {
        return Err(PeerGroupError::NoViableConfiguration {
            reason: format!("target holds {} voters with a maximum of {}", target.voter_count(), max_voters),
        });
    }
    let mut adds: Vec<&ReplicaSetMember> = target
        .voters()
        .filter(|member| !observed.member(member.id).map(|m| m.is_voter()).unwrap_or(false))
        .collect();
    let mut removes: Vec<&ReplicaSetMember> = observed
        .voters()
        .filter(|member| !target.member(member.id).map(|m| m.is_voter()).unwrap_or(false))
        .collect();
    adds.sort_by_key(|member| member.id);
    adds.reverse();
    removes.sort_by_key(|member| member.id);

    // Fold every non-voting change into the base configuration.
    let mut current: Vec<ReplicaSetMember> = vec![];
    for member in observed.members.iter() {
        let is_voter_change = removes.iter().any(|m| m.id == member.id) || adds.iter().any(|m| m.id == member.id);
        if is_voter_change {
            current.push(member.clone());
        } else if let Some(target_member) = target.member(member.id) {
            current.push(target_member.clone());
        }
    }
    for member in target.members.iter() {
        if observed.member(member.id).is_none() && !member.is_voter() {
            current.push(member.clone());
        }
    }

    let mut steps = vec![];
    let mut version = observed.version;
    let mut voter_count = observed.voter_count();
    loop {
        let next_add = if voter_count < max_voters || removes.is_empty() { adds.pop() } else { None };
        let change = if let Some(add) = next_add {
            current.retain(|member| member.id != add.id);
            current.push(add.clone());
            voter_count += 1;
            StepChange::AddVoter {
                member_id: add.id,
                node_id: add.node_id.clone(),
            }
        } else if let Some(remove) = next_removal(&mut removes, primary, voter_count) {
            if Some(remove.id) == primary && !keeps_majority(voter_count) {
                return Err(PeerGroupError::UnsafeTransition {
                    step: steps.len() + 1,
                    detail: format!(
                        "removing primary member {} would leave {} of {} voters, below majority",
                        remove.id,
                        voter_count - 1,
                        voter_count
                    ),
                });
            }
            current.retain(|member| member.id != remove.id);
            if let Some(target_member) = target.member(remove.id) {
                current.push(target_member.clone());
            }
            voter_count -= 1;
            StepChange::RemoveVoter {
                member_id: remove.id,
                node_id: remove.node_id.clone(),
            }
        } else {
            break;
        };
        version += 1;
        steps.push(ApplyStep {
            index: steps.len() + 1,
            change,
            config: PeerGroupConfig::new(version, current.clone()),
        });
    }

    if steps.is_empty() {
        let base = PeerGroupConfig::new(observed.version + 1, current);
        if !base.same_members(observed) {
            steps.push(ApplyStep {
                index: 1,
                change: StepChange::Reconfigure,
                config: base,
            });
        }
    }
    Ok(steps)
}

/// Take the next voter to remove from the ID-ordered `removes`.
///
/// The primary goes first while removing it keeps a majority of `voter_count`, otherwise the
/// lowest non-primary member goes first and the primary is left for last.
fn next_removal<'a>(removes: &mut Vec<&'a ReplicaSetMember>, primary: Option<MemberId>, voter_count: usize) -> Option<&'a ReplicaSetMember> {
    let primary_pos = removes.iter().position(|member| Some(member.id) == primary);
    let pos = match primary_pos {
        Some(pos) if keeps_majority(voter_count) => pos,
        _ => removes.iter().position(|member| Some(member.id) != primary).or(primary_pos)?,
    };
    Some(removes.remove(pos))
}

/// Check if one less voter still forms a majority of `voter_count` voters.
fn keeps_majority(voter_count: usize) -> bool {
    voter_count > 0 && voter_count - 1 >= voter_count / 2 + 1
}

/// Drives the consensus store through the steps toward a target configuration.
pub struct StoreApplier {
    store: Arc<dyn ConsensusStore>,
    max_voters: usize,
    step_timeout: Duration,
    poll_interval: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl StoreApplier {
    /// Create a new instance.
    pub fn new(store: Arc<dyn ConsensusStore>, config: &Config) -> Self {
        metrics::register_counter!(METRIC_APPLY_STEPS, metrics::Unit::Count, "replica set configuration steps submitted and confirmed");
        metrics::register_counter!(METRIC_APPLY_STEP_RETRIES, metrics::Unit::Count, "retried replica set configuration steps");
        metrics::register_counter!(METRIC_APPLY_FAILURES, metrics::Unit::Count, "applies aborted after exhausting the step retry budget");
        Self {
            store,
            max_voters: config.max_voters,
            step_timeout: config.step_timeout(),
            poll_interval: config.step_poll_interval(),
            max_attempts: config.step_max_attempts,
            initial_backoff: config.step_backoff(),
        }
    }

    /// Apply the given target, checking `stop` at every step boundary.
    ///
    /// The store's configuration is observed afresh, so the target's version is only advisory.
    #[tracing::instrument(level = "debug", skip(self, target, stop), fields(target_version = target.version))]
    pub async fn apply(&self, target: &PeerGroupConfig, stop: &watch::Receiver<bool>) -> Result<ApplyOutcome, PeerGroupError> {
        let observed = self.store.current_config().await.map_err(|err| PeerGroupError::ApplyFailed {
            step: 0,
            total: 0,
            change: "read current config".into(),
            reason: format!("{:#}", err),
        })?;
        observed.validate().map_err(PeerGroupError::InvalidObservedConfig)?;
        let primary = match self.store.primary().await {
            Ok(primary) => primary,
            Err(err) => {
                tracing::debug!(error = ?err, "primary unknown, continuing without it");
                None
            }
        };

        let steps = plan_steps(&observed, target, primary, self.max_voters)?;
        let total = steps.len();
        let version = steps.last().map(|step| step.config.version).unwrap_or(observed.version);
        for (done, step) in steps.into_iter().enumerate() {
            if *stop.borrow() {
                tracing::info!(steps_done = done, total, "stop requested, abandoning apply at step boundary");
                return Ok(ApplyOutcome::Interrupted { steps_done: done, total });
            }
            self.apply_step(&step, total).await?;
        }
        Ok(ApplyOutcome::Completed { steps: total, version })
    }

    /// Submit a single step & confirm it, retrying with exponential backoff.
    #[tracing::instrument(level = "debug", skip(self, step), fields(step = step.index, version = step.config.version))]
    async fn apply_step(&self, step: &ApplyStep, total: usize) -> Result<(), PeerGroupError> {
        tracing::info!(step = step.index, total, change = %step.change, version = step.config.version, "applying replica set step");
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 1;
        loop {
            let reason = match self.submit_and_confirm(&step.config).await {
                Ok(()) => {
                    metrics::increment_counter!(METRIC_APPLY_STEPS);
                    return Ok(());
                }
                Err(reason) => reason,
            };
            if attempt >= self.max_attempts {
                metrics::increment_counter!(METRIC_APPLY_FAILURES);
                return Err(PeerGroupError::ApplyFailed {
                    step: step.index,
                    total,
                    change: step.change.to_string(),
                    reason: format!("{} (after {} attempts)", reason, attempt),
                });
            }
            let delay = backoff.next_backoff().unwrap_or(self.initial_backoff);
            tracing::warn!(step = step.index, attempt, ?delay, %reason, "replica set step not confirmed, retrying");
            metrics::increment_counter!(METRIC_APPLY_STEP_RETRIES);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Submit the given config, then poll until the store reports its version.
    async fn submit_and_confirm(&self, config: &PeerGroupConfig) -> Result<(), String> {
        self.store.submit_config(config).await.map_err(|err| format!("submit failed: {:#}", err))?;

        let deadline = Instant::now() + self.step_timeout;
        let mut last = String::from("no response from store");
        loop {
            match tokio::time::timeout_at(deadline, self.store.current_config()).await {
                Ok(Ok(current)) if current.version >= config.version => return Ok(()),
                Ok(Ok(current)) => last = format!("store reports version {}", current.version),
                Ok(Err(err)) => last = format!("{:#}", err),
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + self.poll_interval)).await;
        }
        Err(format!("version {} not confirmed within {:?}, {}", config.version, self.step_timeout, last))
    }
}
