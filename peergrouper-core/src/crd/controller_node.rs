//! ControllerNode CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::NodeAddress;

pub type ControllerNode = ControllerNodeCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the ControllerNode resource.
///
/// Each ControllerNode represents one controller node of the cluster which may participate in
/// the consensus store's replica set. The name of the object is the node's stable ID.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "ControllerNodeCRD",
    status = "ControllerNodeStatus",
    group = "peergrouper.rs",
    version = "v1beta1",
    kind = "ControllerNode",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "cnode",
    printcolumn = r#"{"name":"Life","type":"string","jsonPath":".spec.life"}"#,
    printcolumn = r#"{"name":"Provisioned","type":"boolean","jsonPath":".status.provisioned"}"#,
    printcolumn = r#"{"name":"Has Vote","type":"boolean","jsonPath":".status.hasVote"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControllerNodeSpec {
    /// All known network addresses of the node.
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    /// The lifecycle phase of the node.
    #[serde(default)]
    pub life: Life,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerNodeStatus {
    /// True once the node has been provisioned and its agent is running.
    #[serde(default)]
    pub provisioned: bool,
    /// True while the node's agent reports an error.
    #[serde(default)]
    pub errored: bool,
    /// Whether the node currently holds a vote in the replica set, as published by the peergrouper.
    #[serde(default)]
    pub has_vote: Option<bool>,
}

/// The lifecycle phase of a controller node.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Default for Life {
    fn default() -> Self {
        Self::Alive
    }
}

impl ControllerNodeCRD {
    /// Check if this node is healthy and provisioned enough to hold a vote.
    pub fn is_vote_eligible(&self) -> bool {
        let status = self.status.clone().unwrap_or_default();
        self.spec.life == Life::Alive && status.provisioned && !status.errored
    }

    /// The last published voting status of this node.
    pub fn has_vote(&self) -> Option<bool> {
        self.status.as_ref().and_then(|status| status.has_vote)
    }
}
