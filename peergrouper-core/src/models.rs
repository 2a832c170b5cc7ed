//! Peer group data model.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The ID of the default space, which may never be used as an explicit space argument.
pub const ALPHA_SPACE_ID: &str = "0";

/// The visibility scope of a node address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Only reachable from the node itself.
    MachineLocal,
    /// Reachable from within the cloud or local network.
    CloudLocal,
    /// Reachable from anywhere.
    Public,
}

impl Scope {
    /// The selection rank of this scope, lower is preferred.
    pub fn rank(&self) -> u8 {
        match self {
            Self::CloudLocal => 0,
            Self::Public => 1,
            Self::MachineLocal => 2,
        }
    }

    /// Check if addresses of this scope may be reached by other controller nodes.
    pub fn is_reachable_from_peers(&self) -> bool {
        !matches!(self, Self::MachineLocal)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::MachineLocal => "machine-local",
                Self::CloudLocal => "cloud-local",
                Self::Public => "public",
            }
        )
    }
}

/// One network endpoint of a controller node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    /// The host name or IP of this address.
    pub value: String,
    /// The visibility scope of this address.
    pub scope: Scope,
    /// The space this address belongs to, if any.
    #[serde(default)]
    pub space_id: Option<String>,
}

impl NodeAddress {
    /// Create a new address which belongs to no space.
    pub fn new(value: impl Into<String>, scope: Scope) -> Self {
        Self {
            value: value.into(),
            scope,
            space_id: None,
        }
    }

    /// Place this address in the given space.
    pub fn in_space(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    /// Combine this address with the given port as `host:port`.
    ///
    /// IPv6 literals are bracketed.
    pub fn host_port(&self, port: u16) -> String {
        if self.value.contains(':') && !self.value.starts_with('[') {
            format!("[{}]:{}", self.value, port)
        } else {
            format!("{}:{}", self.value, port)
        }
    }
}

/// A network space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceInfo {
    /// The ID of the space.
    pub id: String,
    /// The human readable name of the space.
    pub name: String,
}

impl SpaceInfo {
    /// Check if this is the zero/unset space.
    pub fn is_unset(&self) -> bool {
        self.id.is_empty() || self.id == ALPHA_SPACE_ID
    }
}

/// The space in which controller nodes should communicate for consensus traffic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DesiredSpace {
    /// No space has been designated, addresses are selected by scope.
    NoPreference,
    /// The designated HA space.
    Space(SpaceInfo),
}

impl std::fmt::Display for DesiredSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPreference => write!(f, "<no preference>"),
            Self::Space(space) => write!(f, "{}", space.name),
        }
    }
}

/// The ID of a replica set member.
pub type MemberId = u32;

/// One entry in the consensus store's membership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    /// The member ID, stable once assigned.
    pub id: MemberId,
    /// The `host:port` of this member.
    pub address: String,
    /// The ID of the controller node this member represents.
    pub node_id: Option<String>,
    /// The vote weight of this member, 0 or 1.
    pub votes: u8,
    /// The election priority of this member.
    pub priority: f64,
}

impl ReplicaSetMember {
    /// Check if this member holds a vote.
    pub fn is_voter(&self) -> bool {
        self.votes > 0
    }
}

/// A full target or observed replica set configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerGroupConfig {
    /// The configuration version, monotonically increasing.
    pub version: u64,
    /// All members of this configuration, ordered by member ID.
    pub members: Vec<ReplicaSetMember>,
}

impl PeerGroupConfig {
    /// Create a new config, ordering the given members by ID.
    pub fn new(version: u64, mut members: Vec<ReplicaSetMember>) -> Self {
        members.sort_by_key(|member| member.id);
        Self { version, members }
    }

    /// Iterate over all voting members.
    pub fn voters(&self) -> impl Iterator<Item = &ReplicaSetMember> {
        self.members.iter().filter(|member| member.is_voter())
    }

    /// The number of voting members.
    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Find the member representing the given node.
    pub fn member_for_node(&self, node_id: &str) -> Option<&ReplicaSetMember> {
        self.members.iter().find(|member| member.node_id.as_deref() == Some(node_id))
    }

    /// Find the member with the given ID.
    pub fn member(&self, id: MemberId) -> Option<&ReplicaSetMember> {
        self.members.iter().find(|member| member.id == id)
    }

    /// Check if both configs hold identical members, ignoring version and member order.
    pub fn same_members(&self, other: &PeerGroupConfig) -> bool {
        if self.members.len() != other.members.len() {
            return false;
        }
        let mut lhs: Vec<_> = self.members.iter().collect();
        let mut rhs: Vec<_> = other.members.iter().collect();
        lhs.sort_by_key(|member| member.id);
        rhs.sort_by_key(|member| member.id);
        lhs == rhs
    }

    /// Verify that member IDs and node tags are unique within this config.
    pub fn validate(&self) -> Result<(), String> {
        let mut ids = BTreeSet::new();
        let mut nodes = BTreeSet::new();
        for member in self.members.iter() {
            if !ids.insert(member.id) {
                return Err(format!("duplicate member id {}", member.id));
            }
            if let Some(node_id) = member.node_id.as_deref() {
                if !nodes.insert(node_id) {
                    return Err(format!("controller node {:?} is tagged on more than one member", node_id));
                }
            }
            if member.votes > 1 {
                return Err(format!("member {} has vote weight {}", member.id, member.votes));
            }
        }
        Ok(())
    }
}
