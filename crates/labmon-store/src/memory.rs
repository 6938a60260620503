use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use labmon_common::{NodeConfig, NodeId};

use crate::types::{ConfigEvent, ConfigStore, ConfigWatchStream};

#[derive(Debug, Clone)]
pub struct MemoryConfigStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<ConfigEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    nodes: Vec<NodeConfig>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::from_configs(Vec::new())
    }

    pub fn from_configs(nodes: Vec<NodeConfig>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            inner: Arc::new(RwLock::new(Inner { revision: 0, nodes })),
            tx,
        }
    }

    fn next_revision(inner: &mut Inner) -> u64 {
        inner.revision = inner.revision.saturating_add(1);
        inner.revision
    }

    fn emit(&self, event: ConfigEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list(&self) -> Result<Vec<NodeConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.nodes.clone())
    }

    async fn get(&self, id: &NodeId) -> Result<Option<NodeConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.nodes.iter().find(|n| n.id() == id).cloned())
    }

    async fn put(&self, config: NodeConfig) -> Result<u64> {
        let event = {
            let mut inner = self.inner.write().await;
            let rev = Self::next_revision(&mut inner);
            match inner.nodes.iter_mut().find(|n| n.id() == config.id()) {
                Some(slot) => *slot = config.clone(),
                None => inner.nodes.push(config.clone()),
            }
            ConfigEvent {
                id: config.id().clone(),
                config: Some(config),
                revision: rev,
            }
        };
        let rev = event.revision;
        self.emit(event);
        Ok(rev)
    }

    async fn remove(&self, id: &NodeId) -> Result<Option<u64>> {
        let event = {
            let mut inner = self.inner.write().await;
            let before = inner.nodes.len();
            inner.nodes.retain(|n| n.id() != id);
            if inner.nodes.len() == before {
                return Ok(None);
            }
            ConfigEvent {
                id: id.clone(),
                config: None,
                revision: Self::next_revision(&mut inner),
            }
        };
        let rev = event.revision;
        self.emit(event);
        Ok(Some(rev))
    }

    async fn watch(&self) -> Result<ConfigWatchStream> {
        let rx = self.tx.subscribe();
        // Lagged receivers drop the missed events; consumers re-list on any event.
        let stream = BroadcastStream::new(rx).filter_map(|msg| msg.ok());
        Ok(Box::pin(stream))
    }
}
