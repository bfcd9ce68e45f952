//! cloud - Cloud control plane provider
//!
//! Wires the cloud API client into the converge engine: one
//! [`converge::Driver`] per resource kind, sharing the client, the budgets
//! from [`config::ProviderConfig`] and one action lock.

pub mod api;
pub mod config;
pub mod logging;
pub mod resources;

use converge::{ActionLock, Driver, KeyedLock};
use std::sync::Arc;
use thiserror::Error;

use config::{ConfigError, ProviderConfig};
use resources::{InstanceKind, PacketFilterKind, SecurityRuleKind};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to create API client: {0}")]
    Client(#[from] api::ApiError),
}

pub struct CloudProvider {
    client: api::Client,
    config: ProviderConfig,
    lock: Arc<dyn ActionLock>,
}

impl CloudProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        let client = api::Client::new(&config)?;
        tracing::info!(
            "Configured cloud provider for {} (region: {})",
            config.endpoint,
            config.region.as_deref().unwrap_or("default")
        );

        Ok(Self {
            client,
            config,
            lock: Arc::new(KeyedLock::new()),
        })
    }

    /// Provider configured from `CLOUD_*` environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(ProviderConfig::from_env()?)
    }

    /// Replace the action lock shared by serialized kinds.
    pub fn with_lock(mut self, lock: Arc<dyn ActionLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn client(&self) -> &api::Client {
        &self.client
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn driver<K: converge::ResourceKind>(&self, kind: K) -> Driver<K> {
        Driver::new(kind)
            .with_timeouts(self.config.timeouts())
            .with_lock(Arc::clone(&self.lock))
    }

    pub fn instances(&self) -> Driver<InstanceKind> {
        self.driver(
            InstanceKind::new(self.client.clone()).with_settle(self.config.settle_delay),
        )
    }

    pub fn packet_filters(&self) -> Driver<PacketFilterKind> {
        self.driver(PacketFilterKind::new(self.client.clone()))
    }

    pub fn security_rules(&self) -> Driver<SecurityRuleKind> {
        self.driver(SecurityRuleKind::new(self.client.clone()))
    }
}
