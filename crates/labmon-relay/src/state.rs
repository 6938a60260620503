use std::sync::Arc;

use labmon_core::{Diagnoser, HttpProbe, HttpTransport, LinkProbe, RelayForwarder, Scanner, SnapshotBoard};

use crate::metrics::Metrics;

pub type SharedLink = Arc<dyn LinkProbe>;

#[derive(Clone)]
pub struct AppState {
    pub forwarder: RelayForwarder,
    pub scanner: Arc<Scanner<HttpProbe>>,
    pub link: SharedLink,
    pub diagnoser: Arc<Diagnoser<HttpTransport, SharedLink>>,
    /// Filled by the refresh loop when a config file is given.
    pub board: Option<Arc<SnapshotBoard>>,
    pub metrics: Arc<Metrics>,
}
