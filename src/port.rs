// fabrictwin: Ethernet switch fabric digital twin
//! Port model (§4.1).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Operational status of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortStatus {
    /// The port has no live peer, or has been administratively shut down.
    Down,
    /// The port has a live peer and may carry traffic.
    Up,
}

impl std::fmt::Display for PortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortStatus::Down => write!(f, "down"),
            PortStatus::Up => write!(f, "up"),
        }
    }
}

/// Switching mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortMode {
    /// Carries a single VLAN, untagged.
    Access,
    /// Carries multiple VLANs, tagged (except for the native VLAN).
    Trunk,
}

impl std::fmt::Display for PortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortMode::Access => write!(f, "access"),
            PortMode::Trunk => write!(f, "trunk"),
        }
    }
}

/// Default port speed in Mbps, matching the original twin's `Port.__init__` default.
pub const DEFAULT_SPEED_MBPS: u32 = 100;

/// A single physical port on a [`crate::switch::Switch`].
///
/// Invariant: `linked_peer_name.is_some() implies status == Up` is maintained by
/// [`crate::registry::SwitchRegistry::link`]/`unlink`, the only callers allowed to set
/// `linked_peer_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// 1-based port index, unique within a switch.
    pub id: i32,
    /// Name of the switch at the other end of the link, if any.
    pub linked_peer_name: Option<String>,
    /// Index of the peer's own port for this link, if any.
    pub linked_peer_port: Option<i32>,
    /// Administrative/operational state.
    pub status: PortStatus,
    /// Access or trunk.
    pub mode: PortMode,
    /// VLAN carried untagged when `mode == Access`.
    pub access_vlan: u16,
    /// Untagged VLAN on a trunk port.
    pub native_vlan: u16,
    /// VLANs permitted on a trunk port.
    pub allowed_vlans: BTreeSet<u16>,
    /// Link speed, used by the OSPF cost metric.
    pub speed_mbps: u32,
    /// Whether this port participates in MVRP.
    pub mvrp_enabled: bool,
}

impl Port {
    /// Create a new port with the defaults from §4.1: access, VLAN 1, 100 Mbps, down.
    pub fn new(id: i32) -> Port {
        Port {
            id,
            linked_peer_name: None,
            linked_peer_port: None,
            status: PortStatus::Down,
            mode: PortMode::Access,
            access_vlan: 1,
            native_vlan: 1,
            allowed_vlans: BTreeSet::from([1]),
            speed_mbps: DEFAULT_SPEED_MBPS,
            mvrp_enabled: false,
        }
    }

    /// Returns `true` if the port is up and has a live peer.
    pub fn is_up_and_linked(&self) -> bool {
        matches!(self.status, PortStatus::Up) && self.linked_peer_name.is_some()
    }

    /// VLAN(s) this port currently carries: the access VLAN, or a trunk's native plus
    /// allowed VLANs.
    pub fn carried_vlans(&self) -> BTreeSet<u16> {
        match self.mode {
            PortMode::Access => BTreeSet::from([self.access_vlan]),
            PortMode::Trunk => {
                let mut vlans = self.allowed_vlans.clone();
                vlans.insert(self.native_vlan);
                vlans
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let p = Port::new(3);
        assert_eq!(p.id, 3);
        assert_eq!(p.status, PortStatus::Down);
        assert_eq!(p.mode, PortMode::Access);
        assert_eq!(p.access_vlan, 1);
        assert_eq!(p.speed_mbps, DEFAULT_SPEED_MBPS);
        assert!(!p.mvrp_enabled);
    }

    #[test]
    fn unlinked_port_is_never_up_and_linked() {
        let mut p = Port::new(1);
        p.status = PortStatus::Up;
        assert!(!p.is_up_and_linked());
    }
}
