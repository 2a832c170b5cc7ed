//! Peer group error abstractions.

use thiserror::Error;

/// Peer group reconciliation error variants.
///
/// Every variant carries the identifiers of the node or step involved so that a logged or
/// surfaced error is actionable on its own.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PeerGroupError {
    /// The caller supplied the zero/unset space as the space to select an address from.
    #[error("space ID 0 supplied as an argument for selecting store address for controller node {node_id:?}")]
    InvalidSpaceArgument { node_id: String },
    /// The node has no address in the requested space.
    #[error("addresses for controller node {node_id:?} in space {space:?} not found")]
    NoAddressInSpace { node_id: String, space: String },
    /// The node has no addresses at all.
    #[error("no addresses found for controller node {node_id:?}")]
    NoAddress { node_id: String },
    /// No configuration satisfies the voter invariants with the current topology.
    #[error("no viable peer group configuration: {reason}")]
    NoViableConfiguration { reason: String },
    /// The store reported a configuration which can not be reconciled safely.
    #[error("invalid observed replica set configuration: {0}")]
    InvalidObservedConfig(String),
    /// A step would drop the primary while also dropping quorum below majority.
    #[error("unsafe transition at step {step}: {detail}")]
    UnsafeTransition { step: usize, detail: String },
    /// A step could not be confirmed within the retry budget.
    #[error("apply failed at step {step}/{total} ({change}): {reason}")]
    ApplyFailed { step: usize, total: usize, change: String, reason: String },
    /// The store could not be reached for longer than the configured escalation bound.
    #[error("consensus store unreachable after {attempts} consecutive attempts: {reason}")]
    StoreUnreachable { attempts: u32, reason: String },
    /// A collaborator could not be read for the current cycle.
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable { collaborator: String, reason: String },
    /// The topology event stream has closed.
    #[error("topology event stream closed")]
    TopologyClosed,
    /// An internal error which the worker can not recover from.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PeerGroupError {
    /// Check if this error must transition the reconciliation worker to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnreachable { .. } | Self::InvalidObservedConfig(_) | Self::TopologyClosed | Self::Internal(_)
        )
    }

    /// Check if this error describes a node which was only deferred for the current cycle.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::NoAddressInSpace { .. } | Self::NoAddress { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_messages_name_the_node_and_space() {
        let err = PeerGroupError::NoAddressInSpace {
            node_id: "3".into(),
            space: "bad-space".into(),
        };
        assert_eq!(err.to_string(), r#"addresses for controller node "3" in space "bad-space" not found"#);

        let err = PeerGroupError::InvalidSpaceArgument { node_id: "3".into() };
        assert_eq!(
            err.to_string(),
            r#"space ID 0 supplied as an argument for selecting store address for controller node "3""#
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(PeerGroupError::TopologyClosed.is_fatal());
        assert!(PeerGroupError::StoreUnreachable { attempts: 5, reason: "down".into() }.is_fatal());
        assert!(PeerGroupError::InvalidObservedConfig("dup".into()).is_fatal());
        assert!(!PeerGroupError::NoViableConfiguration { reason: "none".into() }.is_fatal());
        assert!(!PeerGroupError::ApplyFailed {
            step: 1,
            total: 2,
            change: "add voter".into(),
            reason: "timeout".into()
        }
        .is_fatal());
        assert!(!PeerGroupError::Unavailable {
            collaborator: "consensus store".into(),
            reason: "connection refused".into()
        }
        .is_fatal());
        assert!(PeerGroupError::NoAddress { node_id: "1".into() }.is_deferred());
    }
}
