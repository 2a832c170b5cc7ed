//! Selection of the address used for consensus store traffic.

use peergrouper_core::models::{DesiredSpace, NodeAddress};
use peergrouper_core::PeerGroupError;

use crate::tracker::ControllerTracker;

/// Select the single address of the given node to use for consensus store traffic.
///
/// With no space preference, addresses are selected by scope: cloud-local, then public, then
/// machine-local. With a designated space, only addresses in that space qualify. Ties are broken
/// by taking the lexicographically first address value, so repeated selection is stable.
pub fn select_address(tracker: &ControllerTracker, desired: &DesiredSpace) -> Result<NodeAddress, PeerGroupError> {
    match desired {
        DesiredSpace::NoPreference => by_scope(tracker.addresses_ref().iter()).ok_or_else(|| PeerGroupError::NoAddress {
            node_id: tracker.id().into(),
        }),
        DesiredSpace::Space(space) if space.is_unset() => Err(PeerGroupError::InvalidSpaceArgument {
            node_id: tracker.id().into(),
        }),
        DesiredSpace::Space(space) => tracker
            .addresses_ref()
            .iter()
            .filter(|addr| addr.space_id.as_deref() == Some(space.id.as_str()))
            .min_by(|a, b| a.value.cmp(&b.value))
            .cloned()
            .ok_or_else(|| PeerGroupError::NoAddressInSpace {
                node_id: tracker.id().into(),
                space: space.name.clone(),
            }),
    }
}

/// Select an address of the given node which other nodes can reach, ignoring spaces.
///
/// Used when a node has no address in the designated space. Machine-local addresses never
/// qualify.
pub fn fallback_address(tracker: &ControllerTracker) -> Option<NodeAddress> {
    by_scope(tracker.addresses_ref().iter().filter(|addr| addr.scope.is_reachable_from_peers()))
}

/// Every address of the given node combined with the given port, sorted.
pub fn potential_host_ports(tracker: &ControllerTracker, port: u16) -> Vec<String> {
    let mut host_ports: Vec<_> = tracker.addresses_ref().iter().map(|addr| addr.host_port(port)).collect();
    host_ports.sort();
    host_ports.dedup();
    host_ports
}

fn by_scope<'a>(addrs: impl Iterator<Item = &'a NodeAddress>) -> Option<NodeAddress> {
    addrs.min_by(|a, b| a.scope.rank().cmp(&b.scope.rank()).then_with(|| a.value.cmp(&b.value))).cloned()
}
