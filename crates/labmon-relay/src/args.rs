use std::path::PathBuf;

use clap::Parser;

use labmon_common::DEFAULT_AGENT_PORT;

#[derive(Debug, Parser)]
#[command(author, version, about = "Relay for lab nodes the viewer cannot reach directly")]
pub struct Args {
    #[arg(long, env = "LABMON_RELAY_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    #[arg(long, env = "LABMON_AGENT_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    pub agent_port: u16,

    /// Budget for one forwarded request, until upstream headers arrive.
    #[arg(long, default_value_t = 5000)]
    pub proxy_timeout_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub scan_timeout_ms: u64,

    /// Maximum probes in flight during a subnet scan.
    #[arg(long, default_value_t = 64)]
    pub scan_width: usize,

    #[arg(long, default_value_t = 2)]
    pub ping_timeout_secs: u64,

    #[arg(long, default_value_t = 1500)]
    pub direct_timeout_ms: u64,

    #[arg(long, default_value_t = 10000)]
    pub relay_timeout_ms: u64,

    /// Node list to refresh in the background and serve on /api/nodes.
    #[arg(long, env = "LABMON_CONFIG")]
    pub config_file: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    pub refresh_interval_secs: u64,

    #[arg(long, env = "LABMON_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[arg(long, env = "LABMON_OTLP_URL")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "LABMON_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
