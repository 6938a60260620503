mod args;
mod handlers;
mod metrics;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use clap::Parser;

use labmon_core::{
    refresh_loop, AttemptTimeouts, Diagnoser, HttpProbe, HttpTransport, RelayForwarder, RelayRoute,
    Resolver, Scanner, SnapshotBoard, SystemPing,
};
use labmon_store::FileConfigStore;

use crate::args::Args;
use crate::handlers::{diagnose, healthz, nodes, proxy, scan, sys_ping};
use crate::metrics::{metrics_handler, track_requests};
use crate::state::{AppState, SharedLink};

pub(crate) fn build_app(st: AppState) -> Router {
    let api_routes = Router::new()
        .route("/proxy", get(proxy))
        .route("/scan", get(scan))
        .route("/sys-ping", get(sys_ping))
        .route("/diagnose", get(diagnose))
        .route("/nodes", get(nodes));

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel_guard = labmon_common::telemetry::init_tracing(
        "labmon-relay",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    // The read timeout ends a stalled body stream once headers have arrived.
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .read_timeout(Duration::from_millis(args.proxy_timeout_ms))
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error=%e, "failed to build reqwest client");
            std::process::exit(1);
        });

    let forwarder = RelayForwarder::new(http.clone(), Duration::from_millis(args.proxy_timeout_ms));
    let scanner = Scanner::new(
        HttpProbe::new(http.clone())
            .with_port(args.agent_port)
            .with_timeout(Duration::from_millis(args.scan_timeout_ms)),
        args.scan_width,
    );
    let link: SharedLink = Arc::new(SystemPing::new(Duration::from_secs(args.ping_timeout_secs)));

    let transport = HttpTransport::new(http, RelayRoute::InProcess(forwarder.clone()));
    let resolver = Arc::new(
        Resolver::new(transport)
            .with_agent_port(args.agent_port)
            .with_timeouts(AttemptTimeouts {
                direct: Duration::from_millis(args.direct_timeout_ms),
                relay: Duration::from_millis(args.relay_timeout_ms),
            }),
    );

    let board = match args.config_file.as_ref() {
        Some(path) => {
            let store = Arc::new(FileConfigStore::open(path).await?);
            let board = SnapshotBoard::new();
            let every = Duration::from_secs(args.refresh_interval_secs.max(1));
            tracing::info!(path=%path.display(), interval_secs=every.as_secs(), "background refresh enabled");

            let resolver_for_loop = resolver.clone();
            let board_for_loop = board.clone();
            tokio::spawn(async move {
                if let Err(e) = refresh_loop(resolver_for_loop, store, board_for_loop, every).await {
                    tracing::error!(error=%e, "refresh loop exited");
                }
            });
            Some(board)
        }
        None => None,
    };

    let st = AppState {
        forwarder,
        scanner: Arc::new(scanner),
        link: link.clone(),
        diagnoser: Arc::new(Diagnoser::new(resolver, link)),
        board,
        metrics: Arc::new(metrics::Metrics::default()),
    };

    let app = build_app(st);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(addr=%args.listen_addr, agent_port=args.agent_port, "labmon relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(provider) = otel_guard {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error=%e, "failed to flush spans");
        }
    }
    Ok(())
}
