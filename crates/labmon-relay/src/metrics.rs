use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use labmon_common::FetchError;

use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub proxy_unreachable: AtomicU64,
    pub proxy_timeout: AtomicU64,
    pub scans_total: AtomicU64,
    pub scan_hosts_found: AtomicU64,
}

impl Metrics {
    pub fn record_proxy_error(&self, error: &FetchError) {
        match error {
            FetchError::UpstreamTimeout => {
                self.proxy_timeout.fetch_add(1, Ordering::Relaxed);
            }
            FetchError::UpstreamUnreachable(_) => {
                self.proxy_unreachable.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_scan(&self, found: usize) {
        self.scans_total.fetch_add(1, Ordering::Relaxed);
        self.scan_hosts_found.fetch_add(found as u64, Ordering::Relaxed);
    }

    fn render(&self) -> String {
        let counters = [
            ("labmon_relay_requests_total", &self.requests_total),
            ("labmon_relay_requests_inflight", &self.requests_inflight),
            ("labmon_relay_responses_2xx", &self.status_2xx),
            ("labmon_relay_responses_4xx", &self.status_4xx),
            ("labmon_relay_responses_5xx", &self.status_5xx),
            ("labmon_relay_proxy_unreachable_total", &self.proxy_unreachable),
            ("labmon_relay_proxy_timeout_total", &self.proxy_timeout),
            ("labmon_relay_scans_total", &self.scans_total),
            ("labmon_relay_scan_hosts_found_total", &self.scan_hosts_found),
        ];
        counters
            .iter()
            .map(|(name, v)| format!("{name} {}\n", v.load(Ordering::Relaxed)))
            .collect()
    }
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        st.metrics.render(),
    )
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}
