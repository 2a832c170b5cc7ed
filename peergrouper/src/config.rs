//! Runtime configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use peergrouper_core::models::{DesiredSpace, SpaceInfo, ALPHA_SPACE_ID};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for the HTTP status, healthcheck & metrics server.
    pub http_port: u16,

    /// The Kubernetes namespace holding this cluster's ControllerNode objects.
    pub namespace: String,
    /// The name of the pod on which this instance is running.
    pub pod_name: String,

    /// The gRPC endpoint of the consensus store's replica set admin interface.
    pub store_endpoint: String,
    /// The port on which every controller node's store instance listens.
    #[serde(default = "Config::default_store_port")]
    pub store_port: u16,
    /// The maximum number of voting members of the replica set.
    #[serde(default = "Config::default_max_voters")]
    pub max_voters: usize,

    /// The ID of the designated HA space, if any.
    #[serde(default)]
    pub ha_space_id: Option<String>,
    /// The name of the designated HA space, defaults to its ID.
    #[serde(default)]
    pub ha_space_name: Option<String>,

    /// The interval at which a full re-check is performed, regardless of topology events.
    #[serde(default = "Config::default_recheck_interval_seconds")]
    pub recheck_interval_seconds: u64,
    /// The amount of time to wait for the store to confirm an applied step.
    #[serde(default = "Config::default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    /// The interval at which the store is polled while confirming a step.
    #[serde(default = "Config::default_step_poll_interval_millis")]
    pub step_poll_interval_millis: u64,
    /// The number of attempts made for a single step before failing the apply.
    #[serde(default = "Config::default_step_max_attempts")]
    pub step_max_attempts: u32,
    /// The initial delay between step attempts, doubled on each retry.
    #[serde(default = "Config::default_step_backoff_millis")]
    pub step_backoff_millis: u64,
    /// The timeout applied to each call made to the consensus store.
    #[serde(default = "Config::default_store_call_timeout_seconds")]
    pub store_call_timeout_seconds: u64,
    /// The number of consecutive failed store reads after which the worker fails.
    #[serde(default = "Config::default_store_unreachable_limit")]
    pub store_unreachable_limit: u32,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    ///
    /// The parsed config is validated before it is returned.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the values of this config.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_voters >= 1, "MAX_VOTERS must be at least 1");
        ensure!(self.step_max_attempts >= 1, "STEP_MAX_ATTEMPTS must be at least 1");
        ensure!(self.recheck_interval_seconds >= 1, "RECHECK_INTERVAL_SECONDS must be at least 1");
        ensure!(self.step_poll_interval_millis >= 1, "STEP_POLL_INTERVAL_MILLIS must be at least 1");
        ensure!(
            !matches!(self.ha_space_id.as_deref(), Some("")),
            "HA_SPACE_ID must not be empty when set"
        );
        ensure!(
            self.ha_space_id.as_deref() != Some(ALPHA_SPACE_ID),
            "HA_SPACE_ID must not be the default space ID {}, leave it unset for no preference",
            ALPHA_SPACE_ID
        );
        Ok(())
    }

    /// The desired HA space as configured.
    pub fn desired_space(&self) -> DesiredSpace {
        match &self.ha_space_id {
            Some(id) => DesiredSpace::Space(SpaceInfo {
                id: id.clone(),
                name: self.ha_space_name.clone().unwrap_or_else(|| id.clone()),
            }),
            None => DesiredSpace::NoPreference,
        }
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_seconds)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }

    pub fn step_poll_interval(&self) -> Duration {
        Duration::from_millis(self.step_poll_interval_millis)
    }

    pub fn step_backoff(&self) -> Duration {
        Duration::from_millis(self.step_backoff_millis)
    }

    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_secs(self.store_call_timeout_seconds)
    }

    fn default_store_port() -> u16 {
        37017
    }

    fn default_max_voters() -> usize {
        7
    }

    fn default_recheck_interval_seconds() -> u64 {
        30
    }

    fn default_step_timeout_seconds() -> u64 {
        10
    }

    fn default_step_poll_interval_millis() -> u64 {
        500
    }

    fn default_step_max_attempts() -> u32 {
        3
    }

    fn default_step_backoff_millis() -> u64 {
        1000
    }

    fn default_store_call_timeout_seconds() -> u64 {
        10
    }

    fn default_store_unreachable_limit() -> u32 {
        5
    }

    /// Create a config suitable for use in tests.
    #[cfg(test)]
    pub fn new_test() -> Arc<Self> {
        Arc::new(Self {
            rust_log: "".into(),
            http_port: 7002,
            namespace: "default".into(),
            pod_name: "peergrouper-0".into(),
            store_endpoint: "http://localhost:7010".into(),
            store_port: Self::default_store_port(),
            max_voters: Self::default_max_voters(),
            ha_space_id: None,
            ha_space_name: None,
            recheck_interval_seconds: Self::default_recheck_interval_seconds(),
            step_timeout_seconds: 2,
            step_poll_interval_millis: 100,
            step_max_attempts: Self::default_step_max_attempts(),
            step_backoff_millis: 200,
            store_call_timeout_seconds: 1,
            store_unreachable_limit: 3,
        })
    }
}
