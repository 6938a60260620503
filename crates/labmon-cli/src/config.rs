use std::collections::HashSet;

use anyhow::{bail, Result};

use labmon_common::NodeConfig;
use labmon_core::{host_of, metrics_url};
use labmon_store::ConfigStore;

/// Look a node up by id, then by name. Names must be unambiguous.
pub async fn find_node<S: ConfigStore + ?Sized>(store: &S, key: &str) -> Result<NodeConfig> {
    let nodes = store.list().await?;
    if let Some(n) = nodes.iter().find(|n| n.id().as_str() == key) {
        return Ok(n.clone());
    }
    let mut by_name = nodes.into_iter().filter(|n| n.name() == key);
    match (by_name.next(), by_name.next()) {
        (Some(n), None) => Ok(n),
        (Some(_), Some(_)) => bail!("more than one node is named '{key}', use its id"),
        (None, _) => bail!("no node with id or name '{key}'"),
    }
}

pub fn check_address(address: &str, agent_port: u16) -> Result<()> {
    metrics_url(address, agent_port)?;
    Ok(())
}

/// Apply `edit` to one node and store it under the same id.
pub async fn edit_node<S, F>(store: &S, key: &str, edit: F) -> Result<NodeConfig>
where
    S: ConfigStore + ?Sized,
    F: FnOnce(&mut NodeConfig),
{
    let mut node = find_node(store, key).await?;
    edit(&mut node);
    store.put(node.clone()).await?;
    Ok(node)
}

pub async fn import_nodes<S: ConfigStore + ?Sized>(store: &S, nodes: Vec<NodeConfig>) -> Result<usize> {
    let count = nodes.len();
    for node in nodes {
        store.put(node).await?;
    }
    Ok(count)
}

/// Add scan hits that no configured node already points at, as `node-<addr>`.
pub async fn add_discovered<S: ConfigStore + ?Sized>(
    store: &S,
    found: &[String],
    agent_port: u16,
) -> Result<Vec<NodeConfig>> {
    let known: HashSet<String> = store
        .list()
        .await?
        .iter()
        .flat_map(|n| [Some(n.address()), n.original_address()])
        .flatten()
        .filter_map(|a| host_of(a, agent_port).ok())
        .collect();

    let mut added = Vec::new();
    for host in found {
        if known.contains(host) || added.iter().any(|n: &NodeConfig| n.address() == host) {
            continue;
        }
        let node = NodeConfig::new(format!("node-{host}"), host.as_str());
        store.put(node.clone()).await?;
        added.push(node);
    }
    Ok(added)
}
