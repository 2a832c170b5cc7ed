//! Computation of the target replica set configuration.
//!
//! Planning is a pure function of the observed store configuration, the tracked controller
//! nodes and the configured limits. It never talks to the store or the topology source, which
//! keeps it deterministic: with unchanged inputs, a second plan always reports no change.

use std::collections::BTreeSet;

use peergrouper_core::models::{DesiredSpace, MemberId, NodeAddress, PeerGroupConfig, ReplicaSetMember};
use peergrouper_core::PeerGroupError;

use crate::address::{fallback_address, select_address};
use crate::tracker::ControllerTracker;

/// The priority given to the primary's member while it remains a voter.
pub const PRIMARY_PRIORITY: f64 = 2.0;
/// The priority given to all other voters.
pub const VOTER_PRIORITY: f64 = 1.0;

/// The result of a planning pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanOutcome {
    /// The target configuration.
    pub target: PeerGroupConfig,
    /// Whether the target differs from the observed configuration.
    pub changed: bool,
    /// Nodes excluded from voting this pass, each with the reason.
    pub deferred: Vec<PeerGroupError>,
}

/// A tracked node with its resolved store address.
struct Candidate<'a> {
    tracker: &'a ControllerTracker,
    address: String,
    is_primary: bool,
    is_voter: bool,
}

/// Compute the target configuration for the given observed state.
///
/// `primary` is the member ID of the store's current primary, when known.
pub fn plan(
    observed: &PeerGroupConfig, primary: Option<MemberId>, trackers: &[ControllerTracker], desired: &DesiredSpace, port: u16, max_voters: usize,
) -> Result<PlanOutcome, PeerGroupError> {
    observed.validate().map_err(PeerGroupError::InvalidObservedConfig)?;
    let primary_node = primary
        .or_else(|| favored_member(observed))
        .and_then(|id| observed.member(id))
        .filter(|member| member.is_voter())
        .and_then(|member| member.node_id.clone());

    let mut trackers: Vec<_> = trackers.iter().collect();
    trackers.sort_by(|a, b| a.id().cmp(b.id()));

    // Resolve an address for every node, deferring those without one.
    let mut candidates = Vec::with_capacity(trackers.len());
    let mut deferred = vec![];
    let mut retained = vec![];
    for tracker in trackers {
        let observed_member = observed.member_for_node(tracker.id());
        let address = match select_address(tracker, desired) {
            Ok(addr) => addr,
            Err(err) if !err.is_deferred() => return Err(err),
            Err(err) => match fallback_for(tracker, &err) {
                Some(addr) => addr,
                None => {
                    if let Some(member) = observed_member {
                        retained.push(member.clone());
                    }
                    deferred.push(err);
                    continue;
                }
            },
        };
        candidates.push(Candidate {
            tracker,
            address: address.host_port(port),
            is_primary: primary_node.as_deref() == Some(tracker.id()),
            is_voter: observed_member.map(|member| member.is_voter()).unwrap_or(false),
        });
    }

    let voters = select_voters(&candidates, max_voters)?;

    // Assign member IDs, keeping observed IDs stable and never reusing an observed ID.
    let mut used: BTreeSet<MemberId> = observed.members.iter().map(|member| member.id).collect();
    let mut next_id: MemberId = 0;
    let mut members = Vec::with_capacity(candidates.len() + retained.len());
    for candidate in candidates.iter() {
        let id = match observed.member_for_node(candidate.tracker.id()) {
            Some(member) => member.id,
            None => {
                while used.contains(&next_id) {
                    next_id += 1;
                }
                used.insert(next_id);
                next_id
            }
        };
        let is_voter = voters.contains(candidate.tracker.id());
        let priority = match (is_voter, candidate.is_primary) {
            (true, true) => PRIMARY_PRIORITY,
            (true, false) => VOTER_PRIORITY,
            (false, _) => 0.0,
        };
        members.push(ReplicaSetMember {
            id,
            address: candidate.address.clone(),
            node_id: Some(candidate.tracker.id().into()),
            votes: if is_voter { 1 } else { 0 },
            priority,
        });
    }
    for mut member in retained {
        member.votes = 0;
        member.priority = 0.0;
        members.push(member);
    }

    let mut target = PeerGroupConfig::new(observed.version, members);
    check_invariants(&target, max_voters)?;
    let changed = !target.same_members(observed);
    if changed {
        target.version = observed.version + 1;
    }
    Ok(PlanOutcome { target, changed, deferred })
}

/// Resolve a fallback for a node without an address in the designated space.
fn fallback_for(tracker: &ControllerTracker, err: &PeerGroupError) -> Option<NodeAddress> {
    match err {
        PeerGroupError::NoAddressInSpace { .. } => fallback_address(tracker),
        _ => None,
    }
}

/// Select the IDs of the nodes which should hold a vote.
///
/// Eligible nodes are preferred, ordered by: current primary, current voters, then by the order
/// in which nodes were first observed and by node ID. The selection is trimmed to an odd count no
/// larger than `max_voters`. An ineligible node only receives a vote when no eligible node exists.
fn select_voters(candidates: &[Candidate<'_>], max_voters: usize) -> Result<BTreeSet<String>, PeerGroupError> {
    if candidates.is_empty() {
        return Err(PeerGroupError::NoViableConfiguration {
            reason: "no controller node has a resolvable address".into(),
        });
    }
    if max_voters == 0 {
        return Err(PeerGroupError::NoViableConfiguration {
            reason: "the maximum number of voters is 0".into(),
        });
    }

    let mut ordered: Vec<_> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        (!a.is_primary, !a.is_voter, a.tracker.added_seq(), a.tracker.id()).cmp(&(!b.is_primary, !b.is_voter, b.tracker.added_seq(), b.tracker.id()))
    });
    let eligible: Vec<_> = ordered.iter().filter(|c| c.tracker.is_vote_eligible()).collect();
    if eligible.is_empty() {
        let last_resort = ordered[0].tracker.id();
        tracing::warn!(node_id = %last_resort, "no vote eligible controller nodes, granting a vote to an ineligible node");
        return Ok(std::iter::once(last_resort.to_string()).collect());
    }

    let mut count = eligible.len().min(max_voters);
    if count % 2 == 0 {
        count -= 1;
    }
    Ok(eligible.iter().take(count).map(|c| c.tracker.id().to_string()).collect())
}

/// The member favored by the observed priorities, used when the primary is not reported.
fn favored_member(observed: &PeerGroupConfig) -> Option<MemberId> {
    let mut voters: Vec<_> = observed.voters().filter(|member| member.priority > VOTER_PRIORITY).collect();
    if voters.len() != 1 {
        return None;
    }
    voters.pop().map(|member| member.id)
}

/// Verify the voter invariants of a target before it is returned.
fn check_invariants(target: &PeerGroupConfig, max_voters: usize) -> Result<(), PeerGroupError> {
    let voters = target.voter_count();
    if voters == 0 || voters % 2 == 0 || voters > max_voters {
        return Err(PeerGroupError::NoViableConfiguration {
            reason: format!("computed {} voters with a maximum of {}", voters, max_voters),
        });
    }
    target.validate().map_err(PeerGroupError::Internal)?;
    Ok(())
}
