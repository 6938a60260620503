use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;

use labmon_common::{FetchError, DEFAULT_AGENT_PORT, METRICS_PATH};

use crate::address::SubnetPrefix;
use crate::DEFAULT_SCAN_TIMEOUT;

/// Answers whether a single host runs an agent.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn responds(&self, host: &str) -> bool;
}

/// Probes `http://host:port/metrics`; only a 200 counts.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
    port: u16,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            port: DEFAULT_AGENT_PORT,
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HostProbe for HttpProbe {
    async fn responds(&self, host: &str) -> bool {
        let url = format!("http://{host}:{}{METRICS_PATH}", self.port);
        match self.http.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(e) => {
                tracing::trace!(host, error = %e, "scan probe failed");
                false
            }
        }
    }
}

pub struct Scanner<P> {
    probe: P,
    width: usize,
}

impl<P: HostProbe> Scanner<P> {
    /// `width` bounds in-flight probes; zero is treated as one.
    pub fn new(probe: P, width: usize) -> Self {
        Self {
            probe,
            width: width.max(1),
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Probe `.1` through `.254` of the /24 and return the hosts that answered,
    /// in completion order.
    pub async fn scan(&self, prefix: &str) -> Result<Vec<String>, FetchError> {
        let prefix = SubnetPrefix::parse(prefix)?;
        let started = std::time::Instant::now();

        let found: Vec<String> = stream::iter(1..=254u8)
            .map(|suffix| {
                let host = prefix.host(suffix);
                async move { self.probe.responds(&host).await.then_some(host) }
            })
            .buffer_unordered(self.width)
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        tracing::info!(
            subnet = %prefix,
            found = found.len(),
            width = self.width,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "subnet scan finished"
        );
        Ok(found)
    }
}
