mod args;
mod client;
mod config;
mod output;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use labmon_common::NodeConfig;
use labmon_core::{refresh_all, refresh_loop, Diagnoser, SnapshotBoard};
use labmon_store::{export_config_list, parse_config_list, ConfigStore, FileConfigStore};

use crate::args::{Args, Command, NodesCommand};
use crate::client::{build_link, build_resolver, http_client};
use crate::config::{add_discovered, check_address, edit_node, find_node, import_nodes};
use crate::output::{print_diagnosis, print_json, print_nodes, print_scan, print_snapshots};

async fn run_nodes(args: &Args, store: &FileConfigStore, cmd: NodesCommand) -> Result<()> {
    match cmd {
        NodesCommand::List => {
            let nodes = store.list().await?;
            if args.json {
                print_json(&nodes);
            } else {
                print_nodes(&nodes);
            }
        }
        NodesCommand::Add {
            name,
            address,
            original,
            transport_port,
        } => {
            check_address(&address, args.agent_port)?;
            let mut node = NodeConfig::new(name, address);
            if let Some(orig) = original {
                check_address(&orig, args.agent_port)?;
                node.set_original_address(orig);
            }
            node.set_transport_port(transport_port);
            store.put(node.clone()).await?;
            println!("✓ Added '{}' ({})", node.name(), node.id());
        }
        NodesCommand::Rename { node, name } => {
            let n = edit_node(store, &node, |n| n.rename(name)).await?;
            println!("✓ Renamed {} to '{}'", n.id(), n.name());
        }
        NodesCommand::SetAddress { node, address } => {
            check_address(&address, args.agent_port)?;
            let n = edit_node(store, &node, |n| n.set_address(address)).await?;
            println!("✓ '{}' now at {}", n.name(), n.address());
        }
        NodesCommand::Tunnel {
            node,
            tunnel_address,
        } => {
            check_address(&tunnel_address, args.agent_port)?;
            let n = edit_node(store, &node, |n| n.tunnel_through(tunnel_address)).await?;
            println!(
                "✓ '{}' now via {} (original {})",
                n.name(),
                n.address(),
                n.original_address().unwrap_or("-")
            );
        }
        NodesCommand::ClearOriginal { node } => {
            let n = edit_node(store, &node, |n| n.clear_original_address()).await?;
            println!("✓ Cleared original address of '{}'", n.name());
        }
        NodesCommand::Remove { node } => {
            let n = find_node(store, &node).await?;
            store.remove(n.id()).await?;
            println!("✓ Removed '{}' ({})", n.name(), n.id());
        }
        NodesCommand::Import { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let nodes = parse_config_list(&bytes)?;
            let count = import_nodes(store, nodes).await?;
            println!("✓ Imported {count} nodes from {}", file.display());
        }
        NodesCommand::Export { file } => {
            let bytes = export_config_list(&store.list().await?)?;
            match file {
                Some(path) => {
                    tokio::fs::write(&path, bytes)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("✓ Exported to {}", path.display());
                }
                None => print!("{}", String::from_utf8_lossy(&bytes)),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so that tables and JSON on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let store = Arc::new(FileConfigStore::open(&args.config).await?);
    let http = http_client()?;

    match args.command.clone() {
        Command::Nodes { subcommand } => run_nodes(&args, &store, subcommand).await?,
        Command::Status => {
            let resolver = build_resolver(&args, &http)?;
            let snapshots = refresh_all(&resolver, &store.list().await?).await;
            if args.json {
                print_json(&snapshots);
            } else {
                print_snapshots(&snapshots);
            }
        }
        Command::Watch { interval_secs } => {
            let resolver = Arc::new(build_resolver(&args, &http)?);
            let board = SnapshotBoard::new();
            let mut cycles = board.subscribe();
            let every = Duration::from_secs(interval_secs.max(1));
            let refresher = tokio::spawn(refresh_loop(resolver, store.clone(), board.clone(), every));

            loop {
                tokio::select! {
                    changed = cycles.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshots = board.list();
                        if args.json {
                            print_json(&snapshots);
                        } else {
                            print_snapshots(&snapshots);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            refresher.abort();
        }
        Command::Scan { subnet, add } => {
            let mut found = client::scan(&args, &http, &subnet).await?;
            found.sort_by_key(|h| h.rsplit('.').next().and_then(|s| s.parse::<u8>().ok()));
            let added = if add {
                add_discovered(store.as_ref(), &found, args.agent_port).await?
            } else {
                Vec::new()
            };
            if args.json {
                print_json(&found);
            } else {
                print_scan(&subnet, &found, &added);
            }
        }
        Command::Diagnose { address } => {
            let resolver = Arc::new(build_resolver(&args, &http)?);
            let diagnosis = Diagnoser::new(resolver, build_link(&args, &http)?)
                .diagnose(&address)
                .await?;
            tracing::info!(
                address = address.as_str(),
                classification = ?diagnosis.classification,
                via = ?diagnosis.via,
                "diagnosis finished"
            );
            if args.json {
                print_json(&diagnosis);
            } else {
                print_diagnosis(&diagnosis);
            }
        }
    }
    Ok(())
}
