use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use labmon_common::{FetchError, FetchPath};

use crate::relay::RelayForwarder;

/// One step of a resolution plan: fetch `url` over `path` within `timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub path: FetchPath,
    /// Address as configured, reported back when this attempt wins.
    pub candidate: String,
    pub url: Url,
    pub timeout: Duration,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one attempt and return the raw response body.
    async fn fetch(&self, attempt: &Attempt) -> Result<Bytes, FetchError>;
}

/// Where relayed attempts go.
#[derive(Debug, Clone)]
pub enum RelayRoute {
    /// A relay server reachable at this base URL (`/api/proxy` is appended).
    Remote(Url),
    /// The forwarder runs inside this process.
    InProcess(RelayForwarder),
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    relay: RelayRoute,
}

/// The envelope the relay wraps its own failures in. Upstream error statuses
/// are passed through as-is and never carry it.
#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Map a reqwest failure onto the fetch taxonomy.
pub fn classify_reqwest_error(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::UpstreamTimeout;
    }
    if error.is_builder() {
        return FetchError::validation(error_chain(error));
    }
    if error.is_decode() {
        return FetchError::MalformedPayload(error_chain(error));
    }
    FetchError::UpstreamUnreachable(error_chain(error))
}

fn error_chain(error: &dyn StdError) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, relay: RelayRoute) -> Self {
        Self { http, relay }
    }

    pub fn relay_route(&self) -> &RelayRoute {
        &self.relay
    }

    async fn direct(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError> {
        let resp = self
            .http
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if !resp.status().is_success() {
            return Err(FetchError::UpstreamStatus(resp.status().as_u16()));
        }
        resp.bytes().await.map_err(|e| classify_reqwest_error(&e))
    }

    async fn via_remote(&self, base: &Url, url: &Url, timeout: Duration) -> Result<Bytes, FetchError> {
        let mut proxy = base.clone();
        let path = format!("{}/api/proxy", base.path().trim_end_matches('/'));
        proxy.set_path(&path);
        proxy
            .query_pairs_mut()
            .clear()
            .append_pair("target", url.as_str());

        let resp = self
            .http
            .get(proxy)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = resp.status();
        if status.is_success() {
            return resp.bytes().await.map_err(|e| classify_reqwest_error(&e));
        }

        let body = resp.bytes().await.unwrap_or_default();
        let Some(envelope) = serde_json::from_slice::<RelayErrorBody>(&body)
            .ok()
            .filter(|b| b.status == "error")
        else {
            return Err(FetchError::UpstreamStatus(status.as_u16()));
        };
        let reason = envelope
            .details
            .or(envelope.message)
            .unwrap_or_else(|| format!("relay returned {status}"));
        Err(match status {
            StatusCode::BAD_REQUEST => FetchError::Validation(reason),
            StatusCode::BAD_GATEWAY => FetchError::UpstreamUnreachable(reason),
            StatusCode::GATEWAY_TIMEOUT => FetchError::UpstreamTimeout,
            other => FetchError::UpstreamStatus(other.as_u16()),
        })
    }

    async fn via_forwarder(
        &self,
        forwarder: &RelayForwarder,
        url: &Url,
        timeout: Duration,
    ) -> Result<Bytes, FetchError> {
        let round_trip = async {
            let resp = forwarder.forward(url.as_str(), None).await?;
            if !resp.status().is_success() {
                return Err(FetchError::UpstreamStatus(resp.status().as_u16()));
            }
            resp.bytes().await
        };
        tokio::time::timeout(timeout, round_trip)
            .await
            .unwrap_or(Err(FetchError::UpstreamTimeout))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, attempt: &Attempt) -> Result<Bytes, FetchError> {
        match (attempt.path, &self.relay) {
            (FetchPath::Direct, _) => self.direct(&attempt.url, attempt.timeout).await,
            (FetchPath::Relay, RelayRoute::Remote(base)) => {
                self.via_remote(base, &attempt.url, attempt.timeout).await
            }
            (FetchPath::Relay, RelayRoute::InProcess(fwd)) => {
                self.via_forwarder(fwd, &attempt.url, attempt.timeout).await
            }
        }
    }
}
