use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;

use labmon_common::{NodeConfig, NodeId};

/// Change notification emitted after every successful mutation.
/// `config` is `None` when the node was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub id: NodeId,
    pub config: Option<NodeConfig>,
    pub revision: u64,
}

pub type ConfigWatchStream = Pin<Box<dyn Stream<Item = ConfigEvent> + Send>>;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All configs in insertion order.
    async fn list(&self) -> Result<Vec<NodeConfig>>;
    async fn get(&self, id: &NodeId) -> Result<Option<NodeConfig>>;

    /// Insert or replace the config with the same id. Returns the new revision.
    async fn put(&self, config: NodeConfig) -> Result<u64>;

    /// Remove a config. Returns `None` when the id was unknown.
    async fn remove(&self, id: &NodeId) -> Result<Option<u64>>;

    async fn watch(&self) -> Result<ConfigWatchStream>;
}
