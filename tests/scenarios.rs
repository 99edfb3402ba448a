//! End-to-end scenarios exercising the forwarding and control planes together, through
//! [`SwitchRegistry`] the way the (out-of-scope) CLI layer would.

use std::net::Ipv4Addr;
use std::time::Duration;

use fabrictwin::{SwitchError, SwitchRegistry, SwitchTiming};
use pretty_assertions::assert_eq;

fn add_switch(registry: &SwitchRegistry, name: &str) {
    registry
        .add_switch(name.to_string(), 8, 100_000, SwitchTiming::default())
        .expect("scenario switch names are unique");
}

/// Create a VLAN, assign `port_id` (access), and bind `cidr` to it as an L3 interface.
async fn give_l3_interface(registry: &SwitchRegistry, switch: &str, port_id: i32, vlan_id: u16, cidr: &str) {
    let handle = registry.get(switch).expect("switch was just added");
    let cidr = cidr.to_string();
    handle
        .configure(move |sw| -> Result<(), SwitchError> {
            sw.create_vlan(vlan_id, None).or_else(|err| match err {
                SwitchError::DuplicateVlan(_) => Ok(()),
                other => Err(other),
            })?;
            sw.assign_port_to_vlan(port_id, vlan_id)?;
            sw.create_vlan_interface(vlan_id, cidr.parse().expect("valid scenario CIDR"))
        })
        .await
        .expect("actor is alive")
        .expect("scenario configuration is valid");
}

async fn run_ospf_everywhere(registry: &SwitchRegistry, rounds: u32) {
    for _ in 0..rounds {
        for name in registry.names() {
            registry.get(&name).unwrap().configure(|sw| sw.run_ospf()).await.unwrap();
        }
    }
}

// ---- Scenario 1: two-switch L2 adjacency -----------------------------------------------

#[tokio::test]
async fn two_switch_adjacency_ping_succeeds() {
    let registry = SwitchRegistry::new();
    add_switch(&registry, "sw1");
    add_switch(&registry, "sw2");
    registry.link("sw1", 1, "sw2", 1).await.expect("link");

    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;
    give_l3_interface(&registry, "sw2", 1, 1, "10.1.1.2/24").await;

    let sw1 = registry.get("sw1").unwrap();
    let report = sw1
        .ping("10.1.1.2".parse::<Ipv4Addr>().unwrap(), 4, Duration::from_secs(1))
        .await
        .expect("sw1 actor alive");

    assert_eq!(report.sent(), 4);
    assert_eq!(report.received(), 4);
    assert_eq!(report.loss_percent(), 0);
}

// ---- Scenario 2: three-switch OSPF transit --------------------------------------------

#[tokio::test]
async fn three_switch_ospf_transit_converges_and_forwards() {
    let registry = SwitchRegistry::new();
    for name in ["sw1", "sw2", "sw3"] {
        add_switch(&registry, name);
    }
    registry.link("sw1", 1, "sw2", 1).await.expect("sw1/sw2 link");
    registry.link("sw2", 2, "sw3", 1).await.expect("sw2/sw3 link");

    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;
    give_l3_interface(&registry, "sw2", 1, 1, "10.1.1.2/24").await;
    give_l3_interface(&registry, "sw2", 2, 2, "10.1.2.2/24").await;
    give_l3_interface(&registry, "sw3", 1, 1, "10.1.2.3/24").await;

    // A couple of rounds so the LSA flooded by sw3 has propagated transitively through
    // sw2 to sw1 before anyone recomputes against it.
    run_ospf_everywhere(&registry, 2).await;

    let sw1 = registry.get("sw1").unwrap();
    let route_table = sw1.configure(|sw| sw.show_ip_route()).await.unwrap();
    assert!(
        route_table.contains("10.1.2.0/24") && route_table.contains("ospf"),
        "sw1 should have learned an OSPF route to 10.1.2.0/24:\n{route_table}"
    );

    let report = sw1
        .ping("10.1.2.3".parse::<Ipv4Addr>().unwrap(), 4, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(report.received(), 4);
}

// ---- Scenario 3: TTL expiry / dangling route does not leak the pending queue -----------

#[tokio::test]
async fn unresolvable_next_hop_times_out_and_queue_drains() {
    let timing = SwitchTiming {
        arp_rate_limit: Duration::from_millis(50),
        pending_packet_ttl: Duration::from_millis(50),
    };
    let registry = SwitchRegistry::new();
    registry.add_switch("sw1".to_string(), 4, 100_000, timing).unwrap();
    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;

    let sw1 = registry.get("sw1").unwrap();
    // A static default route points at a gateway IP with no switch behind it; ARP for it
    // will never resolve.
    sw1.configure(|sw| sw.add_static_route("0.0.0.0/0".parse().unwrap(), "10.1.1.99".parse().unwrap()))
        .await
        .unwrap();

    let report = sw1
        .ping("8.8.8.8".parse::<Ipv4Addr>().unwrap(), 4, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(report.received(), 0);

    // Give the actor's own watchdog sweep (1s interval) a moment, but also drive it
    // directly so the assertion doesn't depend on wall-clock scheduling precision.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pending = sw1.configure(|sw| sw.pending_entry_count()).await.unwrap();
    assert_eq!(pending, 0, "stale pending-ARP entries must not accumulate forever");
}

// ---- Scenario 4: a static route outranks a same-network OSPF route --------------------

#[tokio::test]
async fn static_route_survives_ospf_recomputation() {
    let registry = SwitchRegistry::new();
    for name in ["sw1", "sw2"] {
        add_switch(&registry, name);
    }
    registry.link("sw1", 1, "sw2", 1).await.unwrap();
    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;
    give_l3_interface(&registry, "sw2", 1, 1, "10.1.1.2/24").await;
    give_l3_interface(&registry, "sw2", 2, 2, "10.1.2.2/24").await;

    let sw1 = registry.get("sw1").unwrap();
    sw1.configure(|sw| sw.add_static_route("10.1.2.0/24".parse().unwrap(), "10.1.1.2".parse().unwrap()))
        .await
        .unwrap();

    run_ospf_everywhere(&registry, 2).await;

    let route_table = sw1.configure(|sw| sw.show_ip_route()).await.unwrap();
    let route_line = route_table.lines().find(|l| l.starts_with("10.1.2.0/24")).expect("route present");
    assert!(route_line.contains("static"), "static route must not be displaced by OSPF:\n{route_line}");
}

// ---- Scenario 5: ARP requests for an unresolved target are rate-limited ----------------

#[tokio::test]
async fn arp_requests_for_same_target_are_rate_limited() {
    let timing = SwitchTiming {
        arp_rate_limit: Duration::from_secs(5),
        pending_packet_ttl: Duration::from_secs(5),
    };
    let registry = SwitchRegistry::new();
    registry.add_switch("sw1".to_string(), 4, 100_000, timing).unwrap();
    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;

    let sw1 = registry.get("sw1").unwrap();
    let (pending, outstanding) = sw1
        .configure(|sw| {
            for seq in 1..=20u32 {
                let (tx, _rx) = tokio::sync::oneshot::channel();
                sw.originate_ping("10.1.1.50".parse().unwrap(), seq, tx);
            }
            (sw.pending_entry_count(), sw.outstanding_arp_requests())
        })
        .await
        .unwrap();

    assert_eq!(pending, 20, "every attempt should queue while ARP is outstanding");
    assert_eq!(outstanding, 1, "repeat misses for the same target must not re-flood ARP requests");
}

// ---- Scenario 6: link flap and reconvergence -------------------------------------------

#[tokio::test]
async fn link_flap_and_recovery_reconverges_to_the_same_routes() {
    let registry = SwitchRegistry::new();
    for name in ["sw1", "sw2", "sw3"] {
        add_switch(&registry, name);
    }
    registry.link("sw1", 1, "sw2", 1).await.unwrap();
    registry.link("sw2", 2, "sw3", 1).await.unwrap();

    give_l3_interface(&registry, "sw1", 1, 1, "10.1.1.1/24").await;
    give_l3_interface(&registry, "sw2", 1, 1, "10.1.1.2/24").await;
    give_l3_interface(&registry, "sw2", 2, 2, "10.1.2.2/24").await;
    give_l3_interface(&registry, "sw3", 1, 1, "10.1.2.3/24").await;

    run_ospf_everywhere(&registry, 2).await;
    let sw1 = registry.get("sw1").unwrap();
    let before = sw1.configure(|sw| sw.show_ip_route()).await.unwrap();

    // Flap sw1's port down, re-run OSPF everywhere so the withdrawal propagates, then
    // bring it back up and reconverge.
    sw1.configure(|sw| sw.set_port_down(1)).await.unwrap().unwrap();
    run_ospf_everywhere(&registry, 2).await;
    let during = sw1.configure(|sw| sw.show_ip_route()).await.unwrap();
    assert!(!during.contains("10.1.2.0/24"), "route must be withdrawn while the link is down:\n{during}");

    sw1.configure(|sw| sw.set_port_up(1)).await.unwrap().unwrap();
    run_ospf_everywhere(&registry, 2).await;
    let after = sw1.configure(|sw| sw.show_ip_route()).await.unwrap();
    assert_eq!(after, before, "routes should reconverge to the pre-flap state after recovery");
}
