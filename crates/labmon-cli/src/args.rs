use std::path::PathBuf;

use clap::{Parser, Subcommand};

use labmon_common::DEFAULT_AGENT_PORT;

#[derive(Debug, Parser)]
#[command(name = "labmon")]
#[command(about = "Lab GPU monitor: node list, refresh, discovery and diagnostics", long_about = None)]
pub struct Args {
    /// Node list file
    #[arg(long, env = "LABMON_CONFIG", default_value = "labmon-nodes.json")]
    pub config: PathBuf,

    /// Relay base URL. Without it the relay hop runs in this process.
    #[arg(long, env = "LABMON_RELAY_URL")]
    pub relay_url: Option<String>,

    #[arg(long, env = "LABMON_AGENT_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    pub agent_port: u16,

    #[arg(long, default_value_t = 1500)]
    pub direct_timeout_ms: u64,

    #[arg(long, default_value_t = 10000)]
    pub relay_timeout_ms: u64,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Edit the node list
    Nodes {
        #[command(subcommand)]
        subcommand: NodesCommand,
    },
    /// Refresh every node once and print the result
    Status,
    /// Keep refreshing and print every cycle
    Watch {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
    },
    /// Find agents in a /24, e.g. `labmon scan 192.168.1`
    Scan {
        subnet: String,
        /// Add hosts that are not configured yet
        #[arg(long)]
        add: bool,
    },
    /// Check ICMP and agent reachability of one address
    Diagnose { address: String },
}

#[derive(Debug, Clone, Subcommand)]
pub enum NodesCommand {
    List,
    Add {
        name: String,
        address: String,
        /// Address to try before `address`
        #[arg(long)]
        original: Option<String>,
        #[arg(long)]
        transport_port: Option<u16>,
    },
    /// Nodes are selected by id or by unique name
    Rename { node: String, name: String },
    SetAddress { node: String, address: String },
    /// Point the node at a local tunnel, keeping its own address as the original
    Tunnel { node: String, tunnel_address: String },
    ClearOriginal { node: String },
    Remove { node: String },
    /// Merge nodes from a JSON export (full or legacy format)
    Import { file: PathBuf },
    /// Write the node list to a file, or stdout
    Export { file: Option<PathBuf> },
}
