// fabrictwin: Ethernet switch fabric digital twin
//! OSPF-style link-state control plane (§4.5, §4.6).
//!
//! The engine owns the link-state database and the shortest-path computation; it has no
//! knowledge of the switch registry. Anything that needs another switch's state (a
//! neighbor's connected subnets, or the IP of the interface it answers on) is supplied by
//! the caller as plain data or a closure, so this module stays unit-testable without a
//! running fabric.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Reference bandwidth for the OSPF cost metric, matching the original's default.
pub const DEFAULT_REFERENCE_BW_MBPS: u32 = 100_000;

/// Cost assigned to a link whose speed is reported as zero (a misconfigured or disabled
/// port), matching the original twin's ceiling value.
pub const ZERO_SPEED_COST: u32 = 65535;

/// `cost = max(1, reference_bw / speed_mbps)`, or [`ZERO_SPEED_COST`] if `speed_mbps == 0`.
pub fn link_cost(reference_bw_mbps: u32, speed_mbps: u32) -> u32 {
    if speed_mbps == 0 {
        return ZERO_SPEED_COST;
    }
    std::cmp::max(1, reference_bw_mbps / speed_mbps)
}

/// An OSPF-derived route, kept separate from [`crate::routing::RoutingTable`] until
/// redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfRoute {
    /// Next-hop IP toward the destination subnet.
    pub next_hop: Ipv4Addr,
    /// Total path cost.
    pub cost: u32,
}

/// The per-switch link-state control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OspfEngine {
    /// Name of the switch this engine belongs to.
    pub switch_name: String,
    /// Reference bandwidth used by the cost metric.
    pub reference_bw_mbps: u32,
    /// `router_name -> neighbor_name -> cost`. `lsdb[self]` always reflects current live
    /// adjacencies once [`OspfEngine::run`] has executed.
    pub lsdb: BTreeMap<String, BTreeMap<String, u32>>,
    /// Networks this switch is directly connected to, rebuilt from its L3 interfaces on
    /// every [`OspfEngine::run`].
    pub connected_subnets: Vec<Ipv4Net>,
    /// Computed routes, keyed by destination subnet, after the last route recomputation.
    pub ospf_routes: HashMap<Ipv4Net, OspfRoute>,
}

impl OspfEngine {
    /// Create a new engine for `switch_name`.
    pub fn new(switch_name: String, reference_bw_mbps: u32) -> OspfEngine {
        OspfEngine {
            switch_name,
            reference_bw_mbps,
            lsdb: BTreeMap::new(),
            connected_subnets: Vec::new(),
            ospf_routes: HashMap::new(),
        }
    }

    /// This switch's own adjacency row, as it would be flooded to neighbors.
    pub fn own_lsa(&self) -> BTreeMap<String, u32> {
        self.lsdb
            .get(&self.switch_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Step 1-3 of LSA generation: rebuild `lsdb[self]` and `connected_subnets` from the
    /// switch's current live state. `neighbors` is `(neighbor_name, link_cost)` for every
    /// up-linked port; `subnets` is every connected L3 interface's network. Returns the
    /// freshly written LSA, ready to flood.
    pub fn run(
        &mut self,
        neighbors: Vec<(String, u32)>,
        subnets: Vec<Ipv4Net>,
    ) -> BTreeMap<String, u32> {
        let row: BTreeMap<String, u32> = neighbors.into_iter().collect();
        self.connected_subnets = subnets;
        self.lsdb.insert(self.switch_name.clone(), row.clone());
        row
    }

    /// LSA reception (§4.5). Returns `true` if the LSDB changed, in which case the caller
    /// must flood this LSA onward to every up-linked neighbor except `from_node`
    /// (split horizon) and recompute routes.
    pub fn receive_lsa(&mut self, from_node: &str, lsa: BTreeMap<String, u32>) -> bool {
        let changed = self.lsdb.get(from_node) != Some(&lsa);
        if changed {
            self.lsdb.insert(from_node.to_string(), lsa);
        }
        changed
    }

    /// Single-source Dijkstra over the undirected graph implied by the LSDB. Returns, for
    /// every reachable router other than `self`, the total cost and the full path
    /// (`self` first, destination last).
    pub fn shortest_paths(&self) -> HashMap<String, (u32, Vec<String>)> {
        let mut dist: HashMap<String, u32> = HashMap::new();
        let mut prev: HashMap<String, String> = HashMap::new();
        let mut visited: HashMap<String, bool> = HashMap::new();
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();

        dist.insert(self.switch_name.clone(), 0);
        heap.push(HeapEntry {
            cost: 0,
            node: self.switch_name.clone(),
        });

        while let Some(HeapEntry { cost, node }) = heap.pop() {
            if visited.get(&node).copied().unwrap_or(false) {
                continue;
            }
            visited.insert(node.clone(), true);

            let Some(row) = self.lsdb.get(&node) else {
                continue;
            };
            for (neighbor, &edge_cost) in row {
                let candidate = cost.saturating_add(edge_cost);
                if candidate < dist.get(neighbor).copied().unwrap_or(u32::MAX) {
                    dist.insert(neighbor.clone(), candidate);
                    prev.insert(neighbor.clone(), node.clone());
                    heap.push(HeapEntry {
                        cost: candidate,
                        node: neighbor.clone(),
                    });
                }
            }
        }

        let mut result = HashMap::new();
        for (node, &cost) in &dist {
            if node == &self.switch_name {
                continue;
            }
            let mut path = vec![node.clone()];
            let mut cur = node.clone();
            while let Some(p) = prev.get(&cur) {
                path.push(p.clone());
                cur = p.clone();
            }
            path.reverse();
            result.insert(node.clone(), (cost, path));
        }
        result
    }

    /// Route computation (§4.5 step 2 onward). `next_hop_of` resolves the next-hop IP
    /// toward the first-hop router on a shortest path (§4.6); `subnets_of` returns the
    /// destination router's connected subnets. Entries for undeterminable next hops are
    /// skipped. Overwrites [`OspfEngine::ospf_routes`] wholesale.
    pub fn recompute_routes(
        &mut self,
        next_hop_of: impl Fn(&str) -> Option<Ipv4Addr>,
        subnets_of: impl Fn(&str) -> Vec<Ipv4Net>,
    ) {
        self.ospf_routes.clear();
        for (dest_router, (cost, path)) in self.shortest_paths() {
            let Some(first_hop) = path.get(1) else {
                continue;
            };
            let Some(next_hop) = next_hop_of(first_hop) else {
                continue;
            };
            for subnet in subnets_of(&dest_router) {
                self.ospf_routes
                    .entry(subnet)
                    .or_insert(OspfRoute { next_hop, cost });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    cost: u32,
    node: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.cmp(&self.cost).then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
