//! Space catalog abstractions.

use anyhow::Result;

use peergrouper_core::models::DesiredSpace;

use crate::config::Config;

/// A catalog of network spaces.
#[async_trait::async_trait]
pub trait SpaceCatalog: Send + Sync + 'static {
    /// The space designated for consensus traffic.
    async fn desired_ha_space(&self) -> Result<DesiredSpace>;
}

/// A space catalog backed by the runtime config.
pub struct StaticSpaceCatalog {
    space: DesiredSpace,
}

impl StaticSpaceCatalog {
    pub fn new(space: DesiredSpace) -> Self {
        Self { space }
    }

    /// Build a catalog from the `HA_SPACE_*` config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.desired_space())
    }
}

#[async_trait::async_trait]
impl SpaceCatalog for StaticSpaceCatalog {
    async fn desired_ha_space(&self) -> Result<DesiredSpace> {
        Ok(self.space.clone())
    }
}
