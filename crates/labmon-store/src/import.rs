use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use labmon_common::{NodeConfig, NodeId};

/// One entry of an imported node list. Accepts both the full records written
/// by [`export_config_list`] and the older `{name, ip, originalIp}` backups.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "ip")]
    address: String,
    #[serde(default, alias = "originalIp", alias = "original_address")]
    original_address: Option<String>,
    #[serde(default, alias = "transport_port")]
    transport_port: Option<u16>,
}

pub fn parse_config_list(bytes: &[u8]) -> Result<Vec<NodeConfig>> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).context("node list is not valid JSON")?;
    if !value.is_array() {
        bail!("node list must be a JSON array");
    }
    let entries: Vec<ImportEntry> =
        serde_json::from_value(value).context("node list entries are malformed")?;

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        let name = entry.name.trim();
        let address = entry.address.trim();
        if name.is_empty() || address.is_empty() {
            bail!("entry {i}: both 'name' and 'address' (or 'ip') are required");
        }

        let id = match entry.id.filter(|s| !s.trim().is_empty()) {
            Some(id) => NodeId::from(id),
            None => NodeId::generate(),
        };
        if !seen.insert(id.clone()) {
            bail!("entry {i}: duplicate id '{id}'");
        }

        let mut cfg = NodeConfig::with_id(id, name, address);
        if let Some(orig) = entry.original_address.filter(|s| !s.trim().is_empty()) {
            cfg.set_original_address(orig.trim());
        }
        cfg.set_transport_port(entry.transport_port);
        out.push(cfg);
    }
    Ok(out)
}

pub fn export_config_list(configs: &[NodeConfig]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(configs)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_backup_format() {
        let raw = br#"[
            {"name": "Lab-Node-1", "ip": "127.0.0.1:14274", "originalIp": "192.168.1.100"},
            {"name": "Lab-Node-2", "ip": "192.168.1.102"}
        ]"#;
        let configs = parse_config_list(raw).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].address(), "127.0.0.1:14274");
        assert_eq!(configs[0].original_address(), Some("192.168.1.100"));
        assert_eq!(configs[1].original_address(), None);
        assert_ne!(configs[0].id(), configs[1].id());
    }

    #[test]
    fn export_then_import_keeps_ids() {
        let configs = vec![
            NodeConfig::new("a", "10.0.0.1").with_transport_port(22),
            NodeConfig::new("b", "127.0.0.1:9000").with_original_address("10.0.0.2"),
        ];
        let bytes = export_config_list(&configs).unwrap();
        let back = parse_config_list(&bytes).unwrap();
        assert_eq!(back, configs);
    }

    #[test]
    fn rejects_bad_lists() {
        assert!(parse_config_list(b"{}").is_err());
        assert!(parse_config_list(b"not json").is_err());
        assert!(parse_config_list(br#"[{"name": "a"}]"#).is_err());
        assert!(parse_config_list(br#"[{"ip": "10.0.0.1"}]"#).is_err());
        assert!(parse_config_list(
            br#"[{"id": "x", "name": "a", "ip": "10.0.0.1"}, {"id": "x", "name": "b", "ip": "10.0.0.2"}]"#
        )
        .is_err());
    }
}
