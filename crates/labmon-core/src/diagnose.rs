use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use labmon_common::{FetchError, FetchPath};

use crate::address::{host_of, is_safe_host};
use crate::resolver::Resolver;
use crate::transport::Transport;
use crate::DEFAULT_PING_DEADLINE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingOutcome {
    pub reachable: bool,
    pub output: String,
}

/// Link-layer reachability check for one host.
#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome>;
}

#[async_trait]
impl<L: LinkProbe + ?Sized> LinkProbe for Arc<L> {
    async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome> {
        (**self).ping(host).await
    }
}

/// One ICMP echo through the system `ping` utility.
#[derive(Debug, Clone)]
pub struct SystemPing {
    deadline: Duration,
}

impl Default for SystemPing {
    fn default() -> Self {
        Self::new(DEFAULT_PING_DEADLINE)
    }
}

impl SystemPing {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    fn command(&self, host: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", &self.deadline.as_millis().to_string()]);
        } else if cfg!(target_os = "macos") {
            cmd.args(["-c", "1", "-t", &self.deadline.as_secs().max(1).to_string()]);
        } else {
            cmd.args(["-c", "1", "-W", &self.deadline.as_secs().max(1).to_string()]);
        }
        cmd.arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LinkProbe for SystemPing {
    async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome> {
        if !is_safe_host(host) {
            bail!("refusing to ping '{host}'");
        }
        let child = self.command(host).output();
        // The utility enforces its own deadline; this only guards a hung process.
        let output = tokio::time::timeout(self.deadline + Duration::from_secs(1), child)
            .await
            .context("ping did not exit in time")?
            .context("failed to run ping")?;

        let reachable = output.status.success();
        let text = if reachable || !output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            String::from_utf8_lossy(&output.stderr).into_owned()
        };
        Ok(PingOutcome {
            reachable,
            output: text,
        })
    }
}

/// Asks a relay to ping on our behalf, for hosts only the relay can see.
#[derive(Debug, Clone)]
pub struct RemotePing {
    http: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl RemotePing {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            timeout: DEFAULT_PING_DEADLINE + Duration::from_secs(2),
        }
    }

    /// Upper bound on the whole relay round trip, ping included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LinkProbe for RemotePing {
    async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome> {
        let mut url = self.base.clone();
        let path = format!("{}/api/sys-ping", self.base.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("target", host);

        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .context("relay ping request failed")?
            .error_for_status()
            .context("relay ping rejected")?;
        resp.json::<PingOutcome>()
            .await
            .context("relay ping returned an unexpected body")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ReachableServing,
    ReachableNotServing,
    UnreachableServing,
    Unreachable,
}

impl Classification {
    pub fn from_signals(link_ok: bool, agent_ok: bool) -> Self {
        match (link_ok, agent_ok) {
            (true, true) => Self::ReachableServing,
            (true, false) => Self::ReachableNotServing,
            (false, true) => Self::UnreachableServing,
            (false, false) => Self::Unreachable,
        }
    }

    /// A node is usable whenever its agent answers, whatever ICMP says.
    pub fn is_success(self) -> bool {
        matches!(self, Self::ReachableServing | Self::UnreachableServing)
    }

    pub fn message(self, agent_port: u16) -> String {
        match self {
            Self::ReachableServing => "Ping: OK, Agent: OK - node can be monitored.".to_string(),
            Self::ReachableNotServing => format!(
                "Ping: OK, Agent: NG - host is up but the agent on port {agent_port} does not answer. \
                 Check the firewall and that the agent is running."
            ),
            Self::UnreachableServing => {
                "Ping: blocked, Agent: OK - ICMP is filtered but the agent responds.".to_string()
            }
            Self::Unreachable => {
                "Ping: NG, Agent: NG - host cannot be reached. Check the address and network.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub address: String,
    pub success: bool,
    pub classification: Classification,
    pub message: String,
    /// Path the agent answered on, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<FetchPath>,
}

pub struct Diagnoser<T, L> {
    resolver: Arc<Resolver<T>>,
    link: L,
}

impl<T: Transport, L: LinkProbe> Diagnoser<T, L> {
    pub fn new(resolver: Arc<Resolver<T>>, link: L) -> Self {
        Self { resolver, link }
    }

    /// Run the link and agent probes together and classify the pair.
    pub async fn diagnose(&self, address: &str) -> Result<Diagnosis, FetchError> {
        let address = address.trim();
        let host = host_of(address, self.resolver.agent_port())?;

        let (link, agent) = tokio::join!(self.link.ping(&host), self.resolver.probe(address));

        let link_ok = match link {
            Ok(outcome) => outcome.reachable,
            Err(e) => {
                tracing::debug!(host = host.as_str(), error = %e, "link probe unavailable, counting as down");
                false
            }
        };
        let resolved = agent?;
        let via = resolved.as_ref().map(|r| r.path);

        let classification = Classification::from_signals(link_ok, resolved.is_some());
        tracing::info!(address, ?classification, "diagnosis finished");
        Ok(Diagnosis {
            address: address.to_string(),
            success: classification.is_success(),
            classification,
            message: classification.message(self.resolver.agent_port()),
            via,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use axum::{extract::Query, routing::get, Json, Router};

    use super::*;
    use crate::testing::{spawn_server, FakeLink, FakeTransport};

    const AGENT: &str = "http://10.0.0.5:4274/metrics";

    fn diagnoser(agent_up: bool, link: FakeLink) -> Diagnoser<FakeTransport, FakeLink> {
        let transport = if agent_up {
            FakeTransport::new().ok(AGENT, 1)
        } else {
            FakeTransport::new()
        };
        Diagnoser::new(Arc::new(Resolver::new(transport)), link)
    }

    #[tokio::test]
    async fn classifies_all_signal_pairs() {
        let cases = [
            (true, true, Classification::ReachableServing, true),
            (true, false, Classification::ReachableNotServing, false),
            (false, true, Classification::UnreachableServing, true),
            (false, false, Classification::Unreachable, false),
        ];
        for (link, agent, classification, success) in cases {
            let d = diagnoser(agent, FakeLink::new(link));
            let out = d.diagnose("10.0.0.5").await.unwrap();
            assert_eq!(out.classification, classification);
            assert_eq!(out.success, success);
            assert_eq!(out.message, classification.message(4274));
        }
    }

    #[tokio::test]
    async fn blocked_ping_with_live_agent_is_success() {
        let d = diagnoser(true, FakeLink::new(false));
        let out = d.diagnose("10.0.0.5").await.unwrap();
        assert!(out.success);
        assert_eq!(out.classification, Classification::UnreachableServing);
        assert_eq!(out.via, Some(FetchPath::Direct));
    }

    #[tokio::test]
    async fn malformed_address_runs_no_probe() {
        let d = diagnoser(true, FakeLink::new(true));
        let err = d.diagnose("ftp://10.0.0.5").await.unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
        assert_eq!(d.link.calls(), 0);
        assert!(d.resolver.transport().calls().is_empty());
    }

    struct BrokenLink;

    #[async_trait]
    impl LinkProbe for BrokenLink {
        async fn ping(&self, _host: &str) -> anyhow::Result<PingOutcome> {
            bail!("ping: command not found")
        }
    }

    #[tokio::test]
    async fn missing_ping_counts_as_link_down() {
        let resolver = Arc::new(Resolver::new(FakeTransport::new().ok(AGENT, 1)));
        let out = Diagnoser::new(resolver, BrokenLink)
            .diagnose("10.0.0.5")
            .await
            .unwrap();
        assert_eq!(out.classification, Classification::UnreachableServing);
    }

    #[tokio::test]
    async fn probes_run_concurrently() {
        let transport = FakeTransport::new()
            .ok(AGENT, 1)
            .delayed(Duration::from_millis(300));
        let link = FakeLink::new(true).delayed(Duration::from_millis(300));
        let d = Diagnoser::new(Arc::new(Resolver::new(transport)), link);

        let started = Instant::now();
        d.diagnose("10.0.0.5").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn remote_ping_reads_relay_answer() {
        let app = Router::new().route(
            "/api/sys-ping",
            get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
                Json(PingOutcome {
                    reachable: q.get("target").map(String::as_str) == Some("10.0.0.5"),
                    output: "1 packets transmitted".into(),
                })
            }),
        );
        let addr = spawn_server(app).await;
        let ping = RemotePing::new(
            reqwest::Client::new(),
            Url::parse(&format!("http://{addr}")).unwrap(),
        );
        assert!(ping.ping("10.0.0.5").await.unwrap().reachable);
        assert!(!ping.ping("10.0.0.6").await.unwrap().reachable);
    }

    #[tokio::test]
    async fn remote_ping_gives_up_on_stalled_relay() {
        let app = Router::new().route(
            "/api/sys-ping",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(PingOutcome {
                    reachable: true,
                    output: String::new(),
                })
            }),
        );
        let addr = spawn_server(app).await;
        let ping = RemotePing::new(
            reqwest::Client::new(),
            Url::parse(&format!("http://{addr}")).unwrap(),
        )
        .with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        assert!(ping.ping("10.0.0.5").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn system_ping_rejects_unsafe_hosts() {
        let ping = SystemPing::default();
        assert!(ping.ping("10.0.0.1;id").await.is_err());
        assert!(ping.ping("-c9").await.is_err());
    }
}
