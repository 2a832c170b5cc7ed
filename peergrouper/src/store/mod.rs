//! Consensus store abstractions.

mod grpc;

pub use grpc::GrpcStore;

use anyhow::Result;

use peergrouper_core::models::{MemberId, PeerGroupConfig};

/// A driver of the consensus store's replica set configuration.
#[async_trait::async_trait]
pub trait ConsensusStore: Send + Sync + 'static {
    /// The store's currently reported configuration.
    async fn current_config(&self) -> Result<PeerGroupConfig>;

    /// Submit a new configuration to the store.
    async fn submit_config(&self, config: &PeerGroupConfig) -> Result<()>;

    /// The member ID of the current primary, best-effort.
    async fn primary(&self) -> Result<Option<MemberId>>;
}
