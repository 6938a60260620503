use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;

use labmon_common::FetchError;

use crate::diagnose::{LinkProbe, PingOutcome};
use crate::transport::{Attempt, Transport};

/// Serve `app` on an ephemeral loopback port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Agent report with `n` devices in the wire format agents emit.
pub fn agent_body(n: usize) -> String {
    let gpus: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "index": i,
                "name": "NVIDIA A100",
                "utilization": {"gpu": 40.0, "memory": 20.0},
                "memory": {"total": 81920, "used": 1024},
                "temperature": 55.0,
                "power": {"draw": 210.5, "limit": 400.0},
                "processes": [],
            })
        })
        .collect();
    serde_json::json!({ "gpus": gpus }).to_string()
}

/// Scripted transport keyed by attempt URL. Unknown URLs are unreachable.
#[derive(Default)]
pub struct FakeTransport {
    replies: HashMap<String, Result<Bytes, FetchError>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Attempt>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, url: &str, reply: Result<Bytes, FetchError>) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub fn ok(self, url: &str, devices: usize) -> Self {
        self.reply(url, Ok(Bytes::from(agent_body(devices))))
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Attempt> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, attempt: &Attempt) -> Result<Bytes, FetchError> {
        self.calls.lock().unwrap().push(attempt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .get(attempt.url.as_str())
            .cloned()
            .unwrap_or_else(|| Err(FetchError::UpstreamUnreachable("connection refused".into())))
    }
}

pub struct FakeLink {
    pub reachable: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeLink {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkProbe for FakeLink {
    async fn ping(&self, host: &str) -> anyhow::Result<PingOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(PingOutcome {
            reachable: self.reachable,
            output: format!("fake ping {host}"),
        })
    }
}
