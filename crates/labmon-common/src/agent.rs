//! Wire format served by the node agent on `GET /metrics`.
//!
//! Agents in the field emit the device list under `gpus`; newer ones use
//! `devices`. Numeric groups the agent leaves out, or reports as `null` for
//! readings the driver marks `[N/A]`, default to zero so that a partially
//! populated device still shows up.

use serde::{Deserialize, Deserializer};

use crate::error::FetchError;
use crate::snapshot::{DeviceMetric, ProcessEntry, ProcessKind};

#[derive(Debug, Deserialize)]
struct AgentReport {
    #[serde(alias = "gpus")]
    devices: Vec<AgentDevice>,
}

#[derive(Debug, Deserialize)]
struct AgentDevice {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    utilization: Utilization,
    #[serde(default, deserialize_with = "null_as_default")]
    memory: Memory,
    #[serde(default, deserialize_with = "null_as_default")]
    temperature: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    power: Power,
    #[serde(default, deserialize_with = "null_as_default")]
    processes: Vec<AgentProcess>,
}

#[derive(Debug, Default, Deserialize)]
struct Utilization {
    #[serde(default, deserialize_with = "null_as_default")]
    gpu: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    memory: f64,
}

#[derive(Debug, Default, Deserialize)]
struct Memory {
    #[serde(default, deserialize_with = "null_as_default")]
    total: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    used: f64,
}

#[derive(Debug, Default, Deserialize)]
struct Power {
    #[serde(default, deserialize_with = "null_as_default")]
    draw: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    limit: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentProcess {
    pid: u32,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default, alias = "process_name", deserialize_with = "null_as_default")]
    process_name: String,
    #[serde(default, alias = "used_memory", deserialize_with = "null_as_default")]
    used_memory: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    user: String,
    #[serde(default, alias = "container_name")]
    container_name: Option<String>,
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn default_kind() -> String {
    "C".to_string()
}

fn mib(v: f64) -> u64 {
    if v.is_finite() && v > 0.0 {
        v.round() as u64
    } else {
        0
    }
}

fn process_kind(raw: &str) -> ProcessKind {
    match raw {
        "G" | "g" | "graphics" => ProcessKind::Graphics,
        _ => ProcessKind::Compute,
    }
}

impl AgentDevice {
    fn into_metric(self, position: usize) -> DeviceMetric {
        DeviceMetric {
            index: self.index.unwrap_or(position as u32),
            name: self.name,
            compute_utilization_pct: self.utilization.gpu,
            memory_utilization_pct: self.utilization.memory,
            memory_total_mib: mib(self.memory.total),
            memory_used_mib: mib(self.memory.used),
            temperature_c: self.temperature,
            power_draw_w: self.power.draw,
            power_limit_w: self.power.limit,
            processes: self
                .processes
                .into_iter()
                .map(|p| ProcessEntry {
                    pid: p.pid,
                    kind: process_kind(&p.kind),
                    executable_name: p.process_name,
                    memory_used_mib: mib(p.used_memory),
                    owner: p.user,
                    container_label: p.container_name.filter(|c| !c.is_empty()),
                })
                .collect(),
        }
    }
}

/// Decode an agent response body into device metrics.
pub fn parse_report(body: &[u8]) -> Result<Vec<DeviceMetric>, FetchError> {
    let report: AgentReport = serde_json::from_slice(body)
        .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
    Ok(report
        .devices
        .into_iter()
        .enumerate()
        .map(|(i, d)| d.into_metric(i))
        .collect())
}
