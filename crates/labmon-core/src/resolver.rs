//! Per-node path selection.
//!
//! Each candidate address is tried directly first and then through the
//! relay. Candidates are ordered `[original_address?, address]` so a node that
//! was moved behind a tunnel is still reached on its own address when that
//! works again. The plan is built and validated up front; it is then walked
//! lazily and stops at the first well-formed report.

use std::time::Duration;

use tracing::Instrument;

use labmon_common::{
    parse_report, DeviceMetric, FetchError, FetchPath, NodeConfig, NodeSnapshot, DEFAULT_AGENT_PORT,
};

use crate::address::metrics_url;
use crate::transport::{Attempt, Transport};
use crate::{DEFAULT_DIRECT_TIMEOUT, DEFAULT_RELAY_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    pub direct: Duration,
    pub relay: Duration,
}

impl Default for AttemptTimeouts {
    fn default() -> Self {
        Self {
            direct: DEFAULT_DIRECT_TIMEOUT,
            relay: DEFAULT_RELAY_TIMEOUT,
        }
    }
}

/// The attempt that produced a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub address: String,
    pub path: FetchPath,
    pub devices: Vec<DeviceMetric>,
}

pub struct Resolver<T> {
    transport: T,
    timeouts: AttemptTimeouts,
    agent_port: u16,
}

impl<T: Transport> Resolver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeouts: AttemptTimeouts::default(),
            agent_port: DEFAULT_AGENT_PORT,
        }
    }

    pub fn with_timeouts(mut self, timeouts: AttemptTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeouts(&self) -> AttemptTimeouts {
        self.timeouts
    }

    pub fn agent_port(&self) -> u16 {
        self.agent_port
    }

    /// Resolve with the configured timeouts.
    pub async fn resolve(&self, config: &NodeConfig) -> Result<NodeSnapshot, FetchError> {
        self.resolve_with(config, self.timeouts.direct, self.timeouts.relay)
            .await
    }

    /// Fetch a fresh snapshot for `config`.
    ///
    /// Unreachable nodes come back as an offline snapshot, not an error. The
    /// only error is a malformed address, reported before any request is made.
    pub async fn resolve_with(
        &self,
        config: &NodeConfig,
        direct: Duration,
        relay: Duration,
    ) -> Result<NodeSnapshot, FetchError> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(original) = config.original_address() {
            candidates.push(original);
        }
        candidates.push(config.address());

        let timeouts = AttemptTimeouts { direct, relay };
        let attempts = self.plan(&candidates, timeouts)?;

        let span = tracing::debug_span!("resolve", node = %config.id(), name = config.name());
        let outcome = self.run(&attempts).instrument(span).await?;

        Ok(match outcome {
            Some(r) => NodeSnapshot::online(config, r.address, r.path, r.devices),
            None => NodeSnapshot::offline(config),
        })
    }

    /// One resolver pass over a single address.
    pub async fn probe(&self, address: &str) -> Result<Option<Resolved>, FetchError> {
        let attempts = self.plan(&[address], self.timeouts)?;
        let span = tracing::debug_span!("probe", address);
        self.run(&attempts).instrument(span).await
    }

    fn plan(&self, candidates: &[&str], timeouts: AttemptTimeouts) -> Result<Vec<Attempt>, FetchError> {
        let mut attempts = Vec::with_capacity(candidates.len() * 2);
        for candidate in candidates {
            let url = metrics_url(candidate, self.agent_port)?;
            attempts.push(Attempt {
                path: FetchPath::Direct,
                candidate: candidate.to_string(),
                url: url.clone(),
                timeout: timeouts.direct,
            });
            attempts.push(Attempt {
                path: FetchPath::Relay,
                candidate: candidate.to_string(),
                url,
                timeout: timeouts.relay,
            });
        }
        Ok(attempts)
    }

    async fn run(&self, attempts: &[Attempt]) -> Result<Option<Resolved>, FetchError> {
        let mut last: Option<(&Attempt, FetchError)> = None;

        for attempt in attempts {
            let result = self
                .transport
                .fetch(attempt)
                .await
                .and_then(|body| parse_report(&body));

            match result {
                Ok(devices) => {
                    tracing::debug!(
                        candidate = attempt.candidate.as_str(),
                        via = ?attempt.path,
                        devices = devices.len(),
                        "attempt succeeded"
                    );
                    return Ok(Some(Resolved {
                        address: attempt.candidate.clone(),
                        path: attempt.path,
                        devices,
                    }));
                }
                Err(e) if !e.is_fallback_eligible() => return Err(e),
                Err(e) => {
                    tracing::trace!(
                        candidate = attempt.candidate.as_str(),
                        via = ?attempt.path,
                        error = %e,
                        "attempt failed, falling back"
                    );
                    last = Some((attempt, e));
                }
            }
        }

        match last {
            Some((attempt, FetchError::UpstreamTimeout)) => tracing::debug!(
                candidate = attempt.candidate.as_str(),
                via = ?attempt.path,
                "all attempts failed, last one timed out"
            ),
            Some((attempt, e)) => tracing::warn!(
                candidate = attempt.candidate.as_str(),
                via = ?attempt.path,
                kind = e.kind(),
                error = %e,
                "all attempts failed"
            ),
            None => {}
        }
        Ok(None)
    }
}
