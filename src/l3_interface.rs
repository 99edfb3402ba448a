// fabrictwin: Ethernet switch fabric digital twin
//! L3 interface model (§4.1 data model, §4.3 connected-route installation).

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::mac::MacAddress;

/// Whether an [`L3Interface`] is bound to a VLAN or directly to a routed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceScope {
    /// Bound to a VLAN (`VLAN<id>`).
    Vlan(u16),
    /// Bound directly to a single routed port (`Port<id>`).
    Port(i32),
}

/// A routed (L3) interface: an IP address bound to either a VLAN or a single port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L3Interface {
    /// `"VLAN<id>"` or `"Port<id>"`, matching `scope`.
    pub name: String,
    /// The interface's IP address and prefix length.
    pub cidr: Ipv4Net,
    /// Exactly one of {VLAN, port}, never both.
    pub scope: InterfaceScope,
    /// MAC address, unique within the owning switch.
    pub mac_address: MacAddress,
}

impl L3Interface {
    /// Create an interface bound to a VLAN.
    pub fn for_vlan(vlan_id: u16, cidr: Ipv4Net, mac_address: MacAddress) -> L3Interface {
        L3Interface {
            name: format!("VLAN{vlan_id}"),
            cidr,
            scope: InterfaceScope::Vlan(vlan_id),
            mac_address,
        }
    }

    /// Create an interface bound directly to a port.
    pub fn for_port(port_id: i32, cidr: Ipv4Net, mac_address: MacAddress) -> L3Interface {
        L3Interface {
            name: format!("Port{port_id}"),
            cidr,
            scope: InterfaceScope::Port(port_id),
            mac_address,
        }
    }

    /// The interface's own IP address (without prefix length).
    pub fn address(&self) -> Ipv4Addr {
        self.cidr.addr()
    }

    /// The network this interface is directly connected to (`ip & mask`).
    pub fn network(&self) -> Ipv4Net {
        self.cidr.trunc()
    }
}
