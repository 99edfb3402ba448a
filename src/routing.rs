// fabrictwin: Ethernet switch fabric digital twin
//! Routing table: longest-prefix match with provenance (§4.3).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// The source of a routing table entry, used both for precedence and for display.
///
/// Ordering matters: `connected > static > ospf`, used to break ties among routes whose
/// prefix length is equal (which cannot actually happen for distinct entries sharing one
/// key, but is used by [`RoutingTable::install_ospf`] to decide whether an existing entry
/// of higher precedence should block an OSPF install for the *same* network).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provenance {
    /// Installed by the OSPF control plane. Never overwrites an existing entry.
    Ospf,
    /// Installed by a CLI `ip static-route` command.
    Static,
    /// Installed implicitly when an L3 interface is created.
    Connected,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Connected => write!(f, "connected"),
            Provenance::Static => write!(f, "static"),
            Provenance::Ospf => write!(f, "ospf"),
        }
    }
}

/// A single routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Next hop: a local interface IP for connected routes, or the gateway IP for
    /// static/OSPF routes.
    pub next_hop: Ipv4Addr,
    /// Where this route came from.
    pub provenance: Provenance,
}

/// `network -> (next_hop, provenance)`, keyed by the network CIDR (`ip & mask`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    entries: HashMap<Ipv4Net, Route>,
}

impl RoutingTable {
    /// Create an empty routing table.
    pub fn new() -> RoutingTable {
        RoutingTable::default()
    }

    /// Install a connected route. Connected routes always win: they are installed the
    /// moment an L3 interface is created, before any static/OSPF route could reference
    /// the same network.
    pub fn install_connected(&mut self, network: Ipv4Net, interface_ip: Ipv4Addr) {
        self.entries.insert(
            network,
            Route {
                next_hop: interface_ip,
                provenance: Provenance::Connected,
            },
        );
    }

    /// Install (or overwrite) a static route. Static routes always take the CLI's word
    /// for it, overwriting anything but an identical entry.
    pub fn install_static(&mut self, network: Ipv4Net, next_hop: Ipv4Addr) {
        self.entries.insert(
            network,
            Route {
                next_hop,
                provenance: Provenance::Static,
            },
        );
    }

    /// Remove a static route.
    pub fn remove_static(&mut self, network: &Ipv4Net) -> bool {
        if let Some(route) = self.entries.get(network) {
            if route.provenance == Provenance::Static {
                self.entries.remove(network);
                return true;
            }
        }
        false
    }

    /// Install an OSPF-derived route. Per §4.5, OSPF never overwrites an existing entry
    /// of any provenance for the same network.
    pub fn install_ospf(&mut self, network: Ipv4Net, next_hop: Ipv4Addr) {
        self.entries.entry(network).or_insert(Route {
            next_hop,
            provenance: Provenance::Ospf,
        });
    }

    /// Remove every route with OSPF provenance. Used before redistributing a freshly
    /// recomputed OSPF route set, so stale OSPF routes from a since-withdrawn
    /// destination don't linger.
    pub fn clear_ospf(&mut self) {
        self.entries.retain(|_, r| r.provenance != Provenance::Ospf);
    }

    /// Longest-prefix match lookup. Among all networks containing `dst`, the one with the
    /// longest prefix wins; ties broken by provenance order `connected > static > ospf`
    /// (this can only happen for equal-length prefixes from distinct insert calls, which
    /// in practice means equal-length static/ospf entries racing -- static wins).
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<(Ipv4Net, Route)> {
        self.entries
            .iter()
            .filter(|(net, _)| net.contains(&dst))
            .max_by(|(net_a, route_a), (net_b, route_b)| {
                net_a
                    .prefix_len()
                    .cmp(&net_b.prefix_len())
                    .then(route_a.provenance.cmp(&route_b.provenance))
            })
            .map(|(net, route)| (*net, *route))
    }

    /// Direct lookup of a specific network's entry, for `no ip static-route` and tests.
    pub fn get(&self, network: &Ipv4Net) -> Option<Route> {
        self.entries.get(network).copied()
    }

    /// Iterate all entries for `show ip route`.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Net, &Route)> {
        self.entries.iter()
    }
}
