use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use labmon_common::{NodeConfig, NodeId};

use crate::import::{export_config_list, parse_config_list};
use crate::memory::MemoryConfigStore;
use crate::types::{ConfigStore, ConfigWatchStream};

/// Config store persisted as a JSON array on disk. Every mutation rewrites the
/// whole file through a temp file and a rename, and only reaches memory and
/// watchers once that write has succeeded.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    inner: MemoryConfigStore,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    /// Load `path`, or start empty when it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let configs = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_config_list(&bytes)
                .with_context(|| format!("failed to load node list {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        tracing::debug!(path=%path.display(), nodes=configs.len(), "loaded node list");
        Ok(Self {
            path,
            inner: MemoryConfigStore::from_configs(configs),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, configs: &[NodeConfig]) -> Result<()> {
        let bytes = export_config_list(configs)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for FileConfigStore {
    async fn list(&self) -> Result<Vec<NodeConfig>> {
        self.inner.list().await
    }

    async fn get(&self, id: &NodeId) -> Result<Option<NodeConfig>> {
        self.inner.get(id).await
    }

    async fn put(&self, config: NodeConfig) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.inner.list().await?;
        match next.iter_mut().find(|n| n.id() == config.id()) {
            Some(slot) => *slot = config.clone(),
            None => next.push(config.clone()),
        }
        self.persist(&next).await?;
        self.inner.put(config).await
    }

    async fn remove(&self, id: &NodeId) -> Result<Option<u64>> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.inner.list().await?;
        let before = next.len();
        next.retain(|n| n.id() != id);
        if next.len() == before {
            return Ok(None);
        }
        self.persist(&next).await?;
        self.inner.remove(id).await
    }

    async fn watch(&self) -> Result<ConfigWatchStream> {
        self.inner.watch().await
    }
}
