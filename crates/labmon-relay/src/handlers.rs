use axum::{
    body::Body,
    extract::{Query, State},
    http::{header::ACCEPT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use labmon_common::FetchError;
use labmon_core::{is_safe_host, PingOutcome};

use crate::state::AppState;

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn error_response(status: StatusCode, message: &str, details: Option<String>) -> Response {
    let body = ErrorResponse {
        status: "error",
        message: message.to_string(),
        request_id: format!("req_{}", Uuid::new_v4()),
        details,
    };
    (status, Json(body)).into_response()
}

fn fetch_error_response(message: &str, error: &FetchError) -> Response {
    let status = match error {
        FetchError::Validation(_) => StatusCode::BAD_REQUEST,
        FetchError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, message, Some(error.to_string()))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    target: Option<String>,
}

pub async fn proxy(
    State(st): State<AppState>,
    Query(q): Query<TargetQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(target) = q.target.filter(|t| !t.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing target URL", None);
    };

    let forwarded = match st.forwarder.forward(&target, headers.get(ACCEPT)).await {
        Ok(f) => f,
        Err(e) => {
            st.metrics.record_proxy_error(&e);
            return fetch_error_response("Proxy failed", &e);
        }
    };

    let (status, upstream_headers, body) = forwarded.into_parts();
    let mut out = Response::new(Body::from_stream(body));
    *out.status_mut() = status;
    *out.headers_mut() = upstream_headers;
    out
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    subnet: Option<String>,
}

pub async fn scan(State(st): State<AppState>, Query(q): Query<ScanQuery>) -> Response {
    let Some(subnet) = q.subnet else {
        return error_response(StatusCode::BAD_REQUEST, "Missing subnet", None);
    };
    match st.scanner.scan(subnet.trim()).await {
        Ok(found) => {
            st.metrics.record_scan(found.len());
            Json(found).into_response()
        }
        Err(e) => fetch_error_response("Invalid subnet", &e),
    }
}

pub async fn sys_ping(State(st): State<AppState>, Query(q): Query<TargetQuery>) -> Response {
    let target = q.target.unwrap_or_default();
    if !is_safe_host(&target) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid target", None);
    }
    let outcome = match st.link.ping(&target).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(host = target.as_str(), error = %e, "ping could not run");
            PingOutcome {
                reachable: false,
                output: e.to_string(),
            }
        }
    };
    Json(outcome).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DiagnoseQuery {
    address: Option<String>,
}

pub async fn diagnose(State(st): State<AppState>, Query(q): Query<DiagnoseQuery>) -> Response {
    let Some(address) = q.address else {
        return error_response(StatusCode::BAD_REQUEST, "Missing address", None);
    };
    match st.diagnoser.diagnose(&address).await {
        Ok(d) => Json(d).into_response(),
        Err(e) => fetch_error_response("Invalid address", &e),
    }
}

pub async fn nodes(State(st): State<AppState>) -> Response {
    match st.board.as_ref() {
        Some(board) => Json(board.list()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "No node list configured",
            Some("start the relay with --config-file to enable background refresh".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{routing::get, Router};
    use labmon_common::{NodeConfig, NodeSnapshot};
    use labmon_core::{
        Diagnoser, HttpProbe, HttpTransport, LinkProbe, RelayForwarder, RelayRoute, Resolver, Scanner,
        SnapshotBoard,
    };
    use serde_json::Value;

    use super::*;
    use crate::metrics::Metrics;
    use crate::state::SharedLink;

    struct StaticLink(bool);

    #[async_trait::async_trait]
    impl LinkProbe for StaticLink {
        async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome> {
            Ok(PingOutcome {
                reachable: self.0,
                output: format!("PING {host}"),
            })
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn state(agent_port: u16, board: Option<Arc<SnapshotBoard>>) -> AppState {
        let http = reqwest::Client::new();
        let forwarder = RelayForwarder::new(http.clone(), Duration::from_millis(500));
        let link: SharedLink = Arc::new(StaticLink(false));
        let transport = HttpTransport::new(http.clone(), RelayRoute::InProcess(forwarder.clone()));
        let resolver = Resolver::new(transport).with_agent_port(agent_port);
        AppState {
            forwarder,
            scanner: Arc::new(Scanner::new(
                HttpProbe::new(http)
                    .with_port(agent_port)
                    .with_timeout(Duration::from_millis(300)),
                16,
            )),
            link: link.clone(),
            diagnoser: Arc::new(Diagnoser::new(Arc::new(resolver), link)),
            board,
            metrics: Arc::new(Metrics::default()),
        }
    }

    async fn relay(st: AppState) -> String {
        format!("http://{}", serve(crate::build_app(st)).await)
    }

    async fn agent() -> SocketAddr {
        serve(Router::new().route(
            "/metrics",
            get(|| async {
                (
                    [("content-type", "application/json")],
                    r#"{"gpus":[{"index":0,"name":"RTX 4090"}]}"#,
                )
            }),
        ))
        .await
    }

    #[tokio::test]
    async fn proxy_streams_upstream_response() {
        let agent = agent().await;
        let base = relay(state(agent.port(), None)).await;

        let resp = reqwest::get(format!("{base}/api/proxy?target=http://{agent}/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["content-type"], "application/json");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["gpus"][0]["name"], "RTX 4090");
    }

    #[tokio::test]
    async fn proxy_maps_failures_to_status_codes() {
        let st = state(1, None);
        let metrics = st.metrics.clone();
        let base = relay(st).await;

        let resp = reqwest::get(format!("{base}/api/proxy")).await.unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Missing target URL");

        let resp = reqwest::get(format!("{base}/api/proxy?target=not-a-url")).await.unwrap();
        assert_eq!(resp.status(), 400);

        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        let resp = reqwest::get(format!("{base}/api/proxy?target=http://127.0.0.1:{port}/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Proxy failed");
        assert!(body["details"].is_string());
        assert_eq!(metrics.proxy_unreachable.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn proxy_times_out_with_504() {
        let slow = serve(Router::new().route(
            "/metrics",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let base = relay(state(1, None)).await;
        let resp = reqwest::get(format!("{base}/api/proxy?target=http://{slow}/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 504);
    }

    #[tokio::test]
    async fn scan_validates_subnet() {
        let base = relay(state(1, None)).await;
        for query in ["", "?subnet=not-an-ip", "?subnet=10.0.0.1"] {
            let resp = reqwest::get(format!("{base}/api/scan{query}")).await.unwrap();
            assert_eq!(resp.status(), 400, "{query}");
        }
    }

    #[tokio::test]
    async fn scan_finds_loopback_agent() {
        let agent = agent().await;
        let base = relay(state(agent.port(), None)).await;
        let found: Vec<String> = reqwest::get(format!("{base}/api/scan?subnet=127.0.0"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(found.contains(&"127.0.0.1".to_string()));
    }

    #[tokio::test]
    async fn sys_ping_rejects_unsafe_targets() {
        let base = relay(state(1, None)).await;
        for target in ["", "10.0.0.1;id", "$(reboot)", "-c1"] {
            let resp = reqwest::Client::new()
                .get(format!("{base}/api/sys-ping"))
                .query(&[("target", target)])
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400, "{target}");
        }

        let out: PingOutcome = reqwest::get(format!("{base}/api/sys-ping?target=10.0.0.1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!out.reachable);
        assert_eq!(out.output, "PING 10.0.0.1");
    }

    #[tokio::test]
    async fn diagnose_reports_serving_node_behind_icmp_filter() {
        let agent = agent().await;
        let base = relay(state(agent.port(), None)).await;

        let body: Value = reqwest::get(format!("{base}/api/diagnose?address=127.0.0.1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["classification"], "unreachable_serving");
        assert_eq!(body["via"], "direct");

        let resp = reqwest::get(format!("{base}/api/diagnose?address=ftp://x")).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn nodes_serves_board_when_configured() {
        let base = relay(state(1, None)).await;
        let resp = reqwest::get(format!("{base}/api/nodes")).await.unwrap();
        assert_eq!(resp.status(), 404);

        let board = SnapshotBoard::new();
        let config = NodeConfig::new("gpu-1", "10.0.0.1");
        board.replace_all(vec![NodeSnapshot::offline(&config)]);
        let base = relay(state(1, Some(board))).await;
        let snaps: Vec<NodeSnapshot> = reqwest::get(format!("{base}/api/nodes"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(&snaps[0].id, config.id());
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let base = relay(state(1, None)).await;
        let ok = reqwest::get(format!("{base}/healthz")).await.unwrap().text().await.unwrap();
        assert_eq!(ok, "ok");
        let text = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
        assert!(text.contains("labmon_relay_requests_total 1"));
    }
}
