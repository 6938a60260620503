use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::Stream;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, USER_AGENT,
};
use reqwest::{StatusCode, Url};

use labmon_common::FetchError;

use crate::transport::classify_reqwest_error;

pub const RELAY_USER_AGENT: &str = concat!("labmon-relay/", env!("CARGO_PKG_VERSION"));

const HOP_BY_HOP: [&str; 8] = [
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// Forwards a single GET to an arbitrary absolute URL on behalf of a caller
/// that cannot reach it. Knows nothing about nodes.
#[derive(Debug, Clone)]
pub struct RelayForwarder {
    http: reqwest::Client,
    timeout: Duration,
}

/// Upstream response whose body has not been read yet.
#[derive(Debug)]
pub struct Forwarded {
    status: StatusCode,
    headers: HeaderMap,
    response: reqwest::Response,
}

impl Forwarded {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Upstream headers minus hop-by-hop ones, with a permissive CORS origin.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_parts(
        self,
    ) -> (
        StatusCode,
        HeaderMap,
        impl Stream<Item = Result<Bytes, reqwest::Error>>,
    ) {
        (self.status, self.headers, self.response.bytes_stream())
    }

    /// Read the whole body. Used by in-process callers that parse it anyway.
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        self.response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e))
    }
}

impl RelayForwarder {
    /// `http` should carry a read timeout so a stalled body stream ends.
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn validate_target(target: &str) -> Result<Url, FetchError> {
        let url = Url::parse(target.trim())
            .map_err(|e| FetchError::validation(format!("invalid target URL '{target}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::validation(format!(
                "unsupported target scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(FetchError::validation(format!("target '{target}' has no host")));
        }
        Ok(url)
    }

    /// Issue the upstream request. Resolves once headers arrive; the body is
    /// streamed afterwards.
    pub async fn forward(
        &self,
        target: &str,
        accept: Option<&HeaderValue>,
    ) -> Result<Forwarded, FetchError> {
        let url = Self::validate_target(target)?;

        let accept = accept
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*/*"));
        let request = self
            .http
            .get(url.clone())
            .header(USER_AGENT, RELAY_USER_AGENT)
            .header(ACCEPT, accept);

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                let err = classify_reqwest_error(&e);
                tracing::warn!(upstream=%url, error=%err, kind=err.kind(), "relay upstream request failed");
                return Err(err);
            }
            Err(_) => {
                tracing::warn!(upstream=%url, timeout_ms=self.timeout.as_millis() as u64, "relay upstream timed out");
                return Err(FetchError::UpstreamTimeout);
            }
        };

        let status = response.status();
        let headers = forwarded_headers(response.headers());
        tracing::debug!(upstream=%url, status=status.as_u16(), "relay upstream responded");

        Ok(Forwarded {
            status,
            headers,
            response,
        })
    }
}

fn forwarded_headers(src: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len() + 1);
    for (k, v) in src.iter() {
        if HOP_BY_HOP
            .iter()
            .any(|h| k.as_str().eq_ignore_ascii_case(h))
        {
            continue;
        }
        out.append(k.clone(), v.clone());
    }
    out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};

    fn forwarder(timeout: Duration) -> RelayForwarder {
        RelayForwarder::new(reqwest::Client::new(), timeout)
    }

    #[tokio::test]
    async fn rejects_malformed_targets_without_connecting() {
        let fwd = forwarder(Duration::from_secs(1));
        for bad in ["not-a-url", "", "/api/x", "ftp://10.0.0.1/x", "http://"] {
            let err = fwd.forward(bad, None).await.unwrap_err();
            assert!(matches!(err, FetchError::Validation(_)), "{bad}: {err:?}");
        }
    }

    #[tokio::test]
    async fn unroutable_target_is_classified() {
        let fwd = forwarder(Duration::from_millis(500));
        let err = fwd.forward("http://10.255.255.1/x", None).await.unwrap_err();
        assert!(
            matches!(err, FetchError::UpstreamTimeout | FetchError::UpstreamUnreachable(_)),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fwd = forwarder(Duration::from_secs(2));
        let err = fwd
            .forward(&format!("http://{addr}/metrics"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UpstreamUnreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn forwards_status_headers_and_body() {
        let app = Router::new()
            .route(
                "/metrics",
                get(|| async {
                    (
                        [("content-type", "application/json"), ("x-agent", "gpu-agent/2")],
                        r#"{"gpus": []}"#,
                    )
                }),
            )
            .route("/missing", get(|| async { (AxumStatus::NOT_FOUND, "nope") }));
        let addr = spawn_server(app).await;

        let fwd = forwarder(Duration::from_secs(2));
        let resp = fwd
            .forward(&format!("http://{addr}/metrics"), None)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-agent"], "gpu-agent/2");
        assert_eq!(resp.headers()["content-type"], "application/json");
        assert_eq!(resp.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(resp.bytes().await.unwrap(), Bytes::from_static(br#"{"gpus": []}"#));

        let missing = fwd
            .forward(&format!("http://{addr}/missing"), None)
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let app = Router::new().route(
            "/metrics",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = spawn_server(app).await;

        let fwd = forwarder(Duration::from_millis(200));
        let err = fwd
            .forward(&format!("http://{addr}/metrics"), None)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::UpstreamTimeout);
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut src = HeaderMap::new();
        src.insert("connection", HeaderValue::from_static("keep-alive"));
        src.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        src.insert("content-type", HeaderValue::from_static("application/json"));
        src.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("http://a"));
        let out = forwarded_headers(&src);
        assert!(out.get("connection").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert_eq!(out["content-type"], "application/json");
        assert_eq!(out[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
