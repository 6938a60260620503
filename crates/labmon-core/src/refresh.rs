use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use labmon_common::{NodeConfig, NodeId, NodeSnapshot};
use labmon_store::ConfigStore;

use crate::resolver::Resolver;
use crate::transport::Transport;

/// Resolve every config concurrently. Snapshots come back in config order.
pub async fn refresh_all<T: Transport>(resolver: &Resolver<T>, configs: &[NodeConfig]) -> Vec<NodeSnapshot> {
    let resolutions = configs.iter().map(|config| async move {
        match resolver.resolve(config).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(node = %config.id(), name = config.name(), error = %e, "node config is invalid");
                NodeSnapshot::offline(config)
            }
        }
    });
    join_all(resolutions).await
}

/// Latest refresh cycle, keyed by node id.
#[derive(Debug)]
pub struct SnapshotBoard {
    snapshots: DashMap<NodeId, NodeSnapshot>,
    order: RwLock<Vec<NodeId>>,
    cycles: watch::Sender<u64>,
}

impl SnapshotBoard {
    pub fn new() -> Arc<Self> {
        let (cycles, _rx) = watch::channel(0);
        Arc::new(Self {
            snapshots: DashMap::new(),
            order: RwLock::new(Vec::new()),
            cycles,
        })
    }

    /// Publish a whole cycle. Nodes absent from `snapshots` disappear.
    pub fn replace_all(&self, snapshots: Vec<NodeSnapshot>) {
        let mut order = self.order.write().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<NodeId> = snapshots.iter().map(|s| s.id.clone()).collect();
        let keep: HashSet<&NodeId> = ids.iter().collect();

        for snapshot in snapshots {
            self.snapshots.insert(snapshot.id.clone(), snapshot);
        }
        self.snapshots.retain(|id, _| keep.contains(id));
        *order = ids;
        drop(order);

        self.cycles.send_modify(|n| *n += 1);
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeSnapshot> {
        self.snapshots.get(id).map(|s| s.value().clone())
    }

    pub fn list(&self) -> Vec<NodeSnapshot> {
        let order = self.order.read().unwrap_or_else(PoisonError::into_inner);
        order.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Number of cycles published so far.
    pub fn cycles(&self) -> u64 {
        *self.cycles.borrow()
    }

    /// Resolves on `changed()` after each published cycle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cycles.subscribe()
    }
}

/// Refresh on a fixed interval and whenever the config store changes.
/// Runs until the task is dropped; fails only if the store cannot be watched.
pub async fn refresh_loop<T, S>(
    resolver: Arc<Resolver<T>>,
    store: Arc<S>,
    board: Arc<SnapshotBoard>,
    every: Duration,
) -> anyhow::Result<()>
where
    T: Transport,
    S: ConfigStore + ?Sized,
{
    let mut changes = store.watch().await?;
    let mut watching = true;
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            event = changes.next(), if watching => match event {
                Some(event) => {
                    // Coalesce a burst of edits into one cycle.
                    while let Some(Some(_)) = changes.next().now_or_never() {}
                    tracing::debug!(node = %event.id, revision = event.revision, "config changed, refreshing");
                    ticker.reset();
                }
                None => {
                    tracing::warn!("config watch ended, refreshing on interval only");
                    watching = false;
                    continue;
                }
            },
        }

        let configs = match store.list().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list node configs, skipping cycle");
                continue;
            }
        };

        let started = std::time::Instant::now();
        let snapshots = refresh_all(&*resolver, &configs).await;
        let online = snapshots.iter().filter(|s| s.is_online()).count();
        board.replace_all(snapshots);
        tracing::info!(
            nodes = configs.len(),
            online,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh cycle finished"
        );
    }
}
