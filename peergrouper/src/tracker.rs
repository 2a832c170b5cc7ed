//! Per-node view of controller node state.

use peergrouper_core::models::NodeAddress;

/// The observed membership-relevant state of a single controller node.
///
/// Trackers are owned by the reconciliation worker, which is the only writer. The planner only
/// ever sees cloned snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerTracker {
    /// The stable ID of the node, assigned by the topology source.
    id: String,
    /// The node's current addresses, ordered as reported by the topology source.
    addresses: Vec<NodeAddress>,
    /// Whether this node is healthy & provisioned enough to hold a vote.
    vote_eligible: bool,
    /// The order in which this tracker was first observed, higher is more recent.
    added_seq: u64,
}

impl ControllerTracker {
    /// Create a new instance.
    pub fn new(id: impl Into<String>, addresses: Vec<NodeAddress>, vote_eligible: bool, added_seq: u64) -> Self {
        Self {
            id: id.into(),
            addresses,
            vote_eligible,
            added_seq,
        }
    }

    /// The stable ID of this node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A snapshot of this node's current addresses.
    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.addresses.clone()
    }

    /// Borrow this node's addresses without copying.
    pub(crate) fn addresses_ref(&self) -> &[NodeAddress] {
        &self.addresses
    }

    pub fn is_vote_eligible(&self) -> bool {
        self.vote_eligible
    }

    /// The order in which this tracker was first observed.
    pub fn added_seq(&self) -> u64 {
        self.added_seq
    }

    /// Replace this node's address set wholesale.
    ///
    /// Returns `true` if the address set changed.
    pub(crate) fn set_addresses(&mut self, addresses: Vec<NodeAddress>) -> bool {
        if self.addresses == addresses {
            return false;
        }
        self.addresses = addresses;
        true
    }

    /// Update this node's vote eligibility.
    ///
    /// Returns `true` if the value changed.
    pub(crate) fn set_vote_eligible(&mut self, eligible: bool) -> bool {
        if self.vote_eligible == eligible {
            return false;
        }
        self.vote_eligible = eligible;
        true
    }
}
