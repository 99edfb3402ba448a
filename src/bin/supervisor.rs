// fabrictwin: Ethernet switch fabric digital twin
//! Demo harness that exercises the `fabrictwin` library the way the out-of-scope
//! interactive lab supervisor would: build a small topology, bring links up, run OSPF to
//! convergence, and print `show` output. Does not implement the supervisor's stdin command
//! loop or a Telnet front-end -- those remain external collaborators.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fabrictwin::config::{telnet_port_for_index, FabricConfig};
use fabrictwin::switch::SwitchTiming;
use fabrictwin::SwitchRegistry;

/// Command-line flags for the demo harness.
#[derive(Debug, Parser)]
#[command(name = "supervisor", about = "Digital twin fabric demo harness")]
struct Args {
    /// Optional TOML scenario file; unset fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of ping attempts to run between sw1 and sw3 after convergence.
    #[arg(long, default_value_t = 4)]
    ping_count: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => match FabricConfig::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::error!(%err, path = %path.display(), "failed to load scenario file");
                std::process::exit(1);
            }
        },
        None => FabricConfig::default(),
    };

    let registry = SwitchRegistry::new();
    let timing = SwitchTiming {
        arp_rate_limit: Duration::from_millis(config.arp_rate_limit_ms),
        pending_packet_ttl: Duration::from_millis(config.pending_packet_ttl_ms),
    };

    // Scenario 2 from the testable-properties catalogue: sw1 <-> sw2 <-> sw3 transit.
    for name in ["sw1", "sw2", "sw3"] {
        registry
            .add_switch_with_port_speed(
                name.to_string(),
                config.port_count,
                config.reference_bw_mbps,
                config.default_port_speed_mbps,
                timing,
            )
            .expect("switch names are unique in this demo");
    }

    registry.link("sw1", 1, "sw2", 1).await.expect("sw1/sw2 link");
    registry.link("sw2", 2, "sw3", 1).await.expect("sw2/sw3 link");

    configure(&registry, "sw1", 1, 1, "10.1.1.1/24").await;
    configure(&registry, "sw2", 1, 1, "10.1.1.2/24").await;
    configure(&registry, "sw2", 2, 2, "10.1.2.2/24").await;
    configure(&registry, "sw3", 1, 1, "10.1.2.3/24").await;

    for name in registry.names() {
        let handle = registry.get(&name).expect("just listed");
        handle.configure(|sw| sw.run_ospf()).await.expect("run_ospf");
    }

    // Telnet port numbering, reserved but not bound -- see §6.
    for (k, name) in registry.names().into_iter().enumerate() {
        let port = telnet_port_for_index(config.base_telnet_port, k);
        println!("{name}: telnet port reserved at 127.0.0.1:{port} (not started)");
    }

    if let Some(sw1) = registry.get("sw1") {
        let report = sw1
            .ping("10.1.2.3".parse::<Ipv4Addr>().unwrap(), args.ping_count, Duration::from_secs(1))
            .await
            .expect("sw1 actor is alive");
        println!("ping 10.1.2.3 from sw1: {}", report.summary_line());

        let route_table = sw1.configure(|sw| sw.show_ip_route()).await.expect("sw1 actor is alive");
        println!("sw1 routing table:\n{route_table}");
    }

    for name in registry.names() {
        if let Some(handle) = registry.get(&name) {
            let topology = handle.configure(|sw| sw.show_topology()).await.expect("actor is alive");
            print!("{topology}");
        }
    }
}

async fn configure(registry: &SwitchRegistry, switch: &str, port_id: i32, vlan_id: u16, cidr: &str) {
    let handle = registry.get(switch).expect("switch was just created");
    let cidr = cidr.to_string();
    handle
        .configure(move |sw| {
            sw.create_vlan(vlan_id, None).or_else(|err| match err {
                fabrictwin::SwitchError::DuplicateVlan(_) => Ok(()),
                other => Err(other),
            })?;
            sw.assign_port_to_vlan(port_id, vlan_id)?;
            sw.create_vlan_interface(vlan_id, cidr.parse().expect("valid demo CIDR"))
        })
        .await
        .expect("actor is alive")
        .expect("demo configuration is valid");
}
