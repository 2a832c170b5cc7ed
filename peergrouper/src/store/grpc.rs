//! A consensus store driver speaking the `ReplicaSetAdmin` gRPC protocol.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};

use peergrouper_core::models::{MemberId, PeerGroupConfig, ReplicaSetMember};

use crate::config::Config;
use crate::grpc;
use crate::store::ConsensusStore;

/// The member tag holding the ID of the controller node a member represents.
pub const NODE_ID_TAG: &str = "node-id";

/// A gRPC client of the consensus store's replica set admin interface.
#[derive(Clone)]
pub struct GrpcStore {
    client: grpc::ReplicaSetAdminClient<Channel>,
    call_timeout: Duration,
}

impl GrpcStore {
    /// Create a new instance.
    ///
    /// The underlying connection is established lazily on first use.
    pub fn new(config: &Config) -> Result<Self> {
        let channel = Endpoint::from_shared(config.store_endpoint.clone())
            .context("invalid store endpoint")?
            .connect_timeout(config.store_call_timeout())
            .connect_lazy();
        Ok(Self {
            client: grpc::ReplicaSetAdminClient::new(channel),
            call_timeout: config.store_call_timeout(),
        })
    }

    async fn status(&self) -> Result<grpc::ReplicaSetStatus> {
        let mut client = self.client.clone();
        let res = timeout(self.call_timeout, client.get_status(grpc::GetStatusRequest {}))
            .await
            .context("timeout while fetching replica set status")?
            .context("error fetching replica set status")?;
        Ok(res.into_inner())
    }
}

#[async_trait::async_trait]
impl ConsensusStore for GrpcStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn current_config(&self) -> Result<PeerGroupConfig> {
        let status = self.status().await?;
        from_proto(status.config.unwrap_or_default())
    }

    #[tracing::instrument(level = "debug", skip(self, config), fields(version = config.version))]
    async fn submit_config(&self, config: &PeerGroupConfig) -> Result<()> {
        let mut client = self.client.clone();
        timeout(self.call_timeout, client.submit_config(to_proto(config)))
            .await
            .context("timeout while submitting replica set config")?
            .context("error submitting replica set config")?;
        Ok(())
    }

    async fn primary(&self) -> Result<Option<MemberId>> {
        let status = self.status().await?;
        Ok(if status.has_primary { Some(status.primary_id) } else { None })
    }
}

/// Map a wire configuration into the peer group model.
pub fn from_proto(config: grpc::ReplicaSetConfig) -> Result<PeerGroupConfig> {
    let members = config
        .members
        .into_iter()
        .map(|mut member| {
            let votes = u8::try_from(member.votes).with_context(|| format!("member {} has out of range vote weight {}", member.id, member.votes))?;
            Ok(ReplicaSetMember {
                id: member.id,
                address: member.host,
                node_id: member.tags.remove(NODE_ID_TAG),
                votes,
                priority: member.priority,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PeerGroupConfig::new(config.version, members))
}

/// Map a peer group configuration into its wire form.
pub fn to_proto(config: &PeerGroupConfig) -> grpc::ReplicaSetConfig {
    grpc::ReplicaSetConfig {
        version: config.version,
        members: config
            .members
            .iter()
            .map(|member| {
                let mut tags = HashMap::new();
                if let Some(node_id) = member.node_id.as_ref() {
                    tags.insert(NODE_ID_TAG.to_string(), node_id.clone());
                }
                grpc::Member {
                    id: member.id,
                    host: member.address.clone(),
                    votes: member.votes as u32,
                    priority: member.priority,
                    tags,
                }
            })
            .collect(),
    }
}
