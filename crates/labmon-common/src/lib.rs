pub mod agent;
pub mod error;
pub mod node;
pub mod snapshot;
pub mod telemetry;

pub use agent::parse_report;
pub use error::FetchError;
pub use node::{NodeConfig, NodeId};
pub use snapshot::{DeviceMetric, FetchPath, NodeSnapshot, NodeStatus, ProcessEntry, ProcessKind};

/// Port the node agent serves telemetry on when an address carries no explicit port.
pub const DEFAULT_AGENT_PORT: u16 = 4274;

/// Path of the agent's telemetry endpoint.
pub const METRICS_PATH: &str = "/metrics";
