use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Url};

use labmon_core::{
    AttemptTimeouts, HttpProbe, HttpTransport, LinkProbe, RelayForwarder, RelayRoute, RemotePing,
    Resolver, Scanner, SubnetPrefix, SystemPing, DEFAULT_FORWARD_TIMEOUT, DEFAULT_SCAN_WIDTH,
};

use crate::args::Args;

/// Whole-request bound for a relay-side sweep of 254 hosts.
const RELAY_SCAN_BUDGET: Duration = Duration::from_secs(60);

pub fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .build()
        .context("failed to build http client")
}

pub fn relay_base(args: &Args) -> Result<Option<Url>> {
    args.relay_url
        .as_deref()
        .map(|raw| Url::parse(raw).with_context(|| format!("invalid relay URL '{raw}'")))
        .transpose()
}

pub fn build_resolver(args: &Args, http: &Client) -> Result<Resolver<HttpTransport>> {
    let route = match relay_base(args)? {
        Some(base) => RelayRoute::Remote(base),
        None => RelayRoute::InProcess(RelayForwarder::new(http.clone(), DEFAULT_FORWARD_TIMEOUT)),
    };
    Ok(Resolver::new(HttpTransport::new(http.clone(), route))
        .with_agent_port(args.agent_port)
        .with_timeouts(AttemptTimeouts {
            direct: Duration::from_millis(args.direct_timeout_ms),
            relay: Duration::from_millis(args.relay_timeout_ms),
        }))
}

/// Ping from the relay when one is configured; it sits on the lab network.
pub fn build_link(args: &Args, http: &Client) -> Result<Arc<dyn LinkProbe>> {
    Ok(match relay_base(args)? {
        Some(base) => Arc::new(RemotePing::new(http.clone(), base)),
        None => Arc::new(SystemPing::default()),
    })
}

pub async fn scan(args: &Args, http: &Client, subnet: &str) -> Result<Vec<String>> {
    // Fail on a bad prefix before touching the network either way.
    SubnetPrefix::parse(subnet)?;

    let Some(base) = relay_base(args)? else {
        tracing::info!(subnet, "scanning from this host");
        let probe = HttpProbe::new(http.clone()).with_port(args.agent_port);
        return Ok(Scanner::new(probe, DEFAULT_SCAN_WIDTH).scan(subnet).await?);
    };
    tracing::info!(subnet, relay = base.as_str(), "scanning through relay");
    scan_via_relay(http, &base, subnet, RELAY_SCAN_BUDGET).await
}

async fn scan_via_relay(http: &Client, base: &Url, subnet: &str, budget: Duration) -> Result<Vec<String>> {
    let mut url = base.clone();
    url.set_path(&format!("{}/api/scan", base.path().trim_end_matches('/')));
    url.query_pairs_mut().clear().append_pair("subnet", subnet);
    let resp = http
        .get(url)
        .timeout(budget)
        .send()
        .await
        .context("relay scan request failed")?;
    if !resp.status().is_success() {
        let status = resp.status();
        bail!("relay scan failed ({status}): {}", resp.text().await.unwrap_or_default());
    }
    resp.json().await.context("relay scan returned an unexpected body")
}
