use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::{NodeConfig, NodeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
}

/// Which hop delivered the telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FetchPath {
    Direct,
    Relay,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Compute,
    Graphics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub kind: ProcessKind,
    pub executable_name: String,
    pub memory_used_mib: u64,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceMetric {
    pub index: u32,
    pub name: String,
    pub compute_utilization_pct: f64,
    pub memory_utilization_pct: f64,
    pub memory_total_mib: u64,
    pub memory_used_mib: u64,
    pub temperature_c: f64,
    pub power_draw_w: f64,
    pub power_limit_w: f64,

    #[serde(default)]
    pub processes: Vec<ProcessEntry>,
}

/// Result of one refresh cycle for one node. Never merged with an earlier
/// snapshot: an offline node carries no devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub resolved_address: Option<String>,
    pub via: Option<FetchPath>,
    pub status: NodeStatus,
    pub observed_at: DateTime<Utc>,

    #[serde(default)]
    pub devices: Vec<DeviceMetric>,
}

impl NodeSnapshot {
    pub fn online(
        config: &NodeConfig,
        resolved_address: impl Into<String>,
        via: FetchPath,
        devices: Vec<DeviceMetric>,
    ) -> Self {
        Self {
            id: config.id().clone(),
            name: config.name().to_string(),
            resolved_address: Some(resolved_address.into()),
            via: Some(via),
            status: NodeStatus::Online,
            observed_at: Utc::now(),
            devices,
        }
    }

    pub fn offline(config: &NodeConfig) -> Self {
        Self {
            id: config.id().clone(),
            name: config.name().to_string(),
            resolved_address: None,
            via: None,
            status: NodeStatus::Offline,
            observed_at: Utc::now(),
            devices: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}
