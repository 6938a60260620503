use std::time::Duration;

pub mod address;
pub mod diagnose;
pub mod refresh;
pub mod relay;
pub mod resolver;
pub mod scanner;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{host_of, is_safe_host, metrics_url, SubnetPrefix};
pub use diagnose::{Classification, Diagnoser, Diagnosis, LinkProbe, PingOutcome, RemotePing, SystemPing};
pub use refresh::{refresh_all, refresh_loop, SnapshotBoard};
pub use relay::{Forwarded, RelayForwarder};
pub use resolver::{AttemptTimeouts, Resolved, Resolver};
pub use scanner::{HostProbe, HttpProbe, Scanner};
pub use transport::{Attempt, HttpTransport, RelayRoute, Transport};

/// Direct fetch budget. Kept short: remote nodes usually fail here.
pub const DEFAULT_DIRECT_TIMEOUT: Duration = Duration::from_millis(1500);
/// Budget for a whole relayed round trip, which may cross slow tunnels.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget the relay itself gives the upstream node.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SCAN_WIDTH: usize = 64;
pub const DEFAULT_PING_DEADLINE: Duration = Duration::from_secs(2);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
