use serde::Serialize;

use labmon_common::{FetchPath, NodeConfig, NodeSnapshot, NodeStatus};
use labmon_core::Diagnosis;

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

pub fn print_nodes(nodes: &[NodeConfig]) {
    println!("\n=== Lab Nodes ===\n");
    if nodes.is_empty() {
        println!("No nodes configured.");
        return;
    }
    println!(
        "{:<38} {:<20} {:<24} {:<20}",
        "ID", "Name", "Address", "Original"
    );
    println!("{:-<104}", "");
    for n in nodes {
        println!(
            "{:<38} {:<20} {:<24} {:<20}",
            n.id().as_str(),
            n.name(),
            n.address(),
            n.original_address().unwrap_or("-")
        );
    }
    println!();
}

fn via_label(via: Option<FetchPath>) -> &'static str {
    match via {
        Some(FetchPath::Direct) => "direct",
        Some(FetchPath::Relay) => "relay",
        None => "-",
    }
}

pub fn print_snapshots(snapshots: &[NodeSnapshot]) {
    let online = snapshots.iter().filter(|s| s.is_online()).count();
    println!("\n=== Node Status ({online}/{} online) ===\n", snapshots.len());
    if snapshots.is_empty() {
        println!("No nodes configured.");
        return;
    }
    println!(
        "{:<20} {:<8} {:<24} {:<7} {:<6}",
        "Name", "Status", "Address", "Via", "GPUs"
    );
    println!("{:-<70}", "");
    for s in snapshots {
        let status = match s.status {
            NodeStatus::Online => "ONLINE",
            NodeStatus::Offline => "OFFLINE",
        };
        println!(
            "{:<20} {:<8} {:<24} {:<7} {:<6}",
            s.name,
            status,
            s.resolved_address.as_deref().unwrap_or("-"),
            via_label(s.via),
            s.devices.len()
        );
        for d in &s.devices {
            println!(
                "    [{}] {:<24} util {:>5.1}%  mem {:>6}/{:<6} MiB  {:>4.0}C  {:>6.1}/{:.0} W  procs {}",
                d.index,
                d.name,
                d.compute_utilization_pct,
                d.memory_used_mib,
                d.memory_total_mib,
                d.temperature_c,
                d.power_draw_w,
                d.power_limit_w,
                d.processes.len()
            );
        }
    }
    println!();
}

pub fn print_scan(subnet: &str, found: &[String], added: &[NodeConfig]) {
    println!("\n=== Scan {subnet}.0/24 ===\n");
    if found.is_empty() {
        println!("No agents found.");
    }
    for host in found {
        let mark = if added.iter().any(|n| n.address() == host) {
            " (added)"
        } else {
            ""
        };
        println!("  {host}{mark}");
    }
    println!();
}

pub fn print_diagnosis(d: &Diagnosis) {
    let mark = if d.success { "✓" } else { "✗" };
    println!("{mark} {}: {}", d.address, d.message);
    if let Some(via) = d.via {
        println!("  agent answered via {}", via_label(Some(via)));
    }
}
