// fabrictwin: Ethernet switch fabric digital twin
//! VLAN manager (§4.2).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SwitchError;

/// A single VLAN and its member ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vlan {
    /// VLAN id, 1..=4094.
    pub id: u16,
    /// Human-readable name, defaults to `VLAN<id>`.
    pub name: String,
    /// Ports currently assigned to this VLAN.
    pub member_ports: BTreeSet<i32>,
}

impl Vlan {
    fn new(id: u16, name: Option<String>) -> Vlan {
        Vlan {
            id,
            name: name.unwrap_or_else(|| format!("VLAN{id}")),
            member_ports: BTreeSet::new(),
        }
    }
}

/// Owns the set of VLANs configured on a switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VlanManager {
    vlans: BTreeMap<u16, Vlan>,
}

impl VlanManager {
    /// Create an empty VLAN manager.
    pub fn new() -> VlanManager {
        VlanManager::default()
    }

    /// Create a VLAN. Returns [`SwitchError::DuplicateVlan`] if it already exists.
    pub fn create(&mut self, id: u16, name: Option<String>) -> Result<(), SwitchError> {
        if self.vlans.contains_key(&id) {
            return Err(SwitchError::DuplicateVlan(id));
        }
        self.vlans.insert(id, Vlan::new(id, name));
        Ok(())
    }

    /// Rename an existing VLAN.
    pub fn rename(&mut self, id: u16, name: String) -> Result<(), SwitchError> {
        let vlan = self.vlans.get_mut(&id).ok_or(SwitchError::VlanNotFound(id))?;
        vlan.name = name;
        Ok(())
    }

    /// Delete a VLAN. Per §4.2, this twin does not cascade into any L3Interface bound to
    /// the VLAN: the interface is left in place and becomes unreachable (its ARP
    /// resolution will simply never succeed once the VLAN's ports are gone).
    pub fn delete(&mut self, id: u16) -> Result<(), SwitchError> {
        self.vlans.remove(&id).ok_or(SwitchError::VlanNotFound(id))?;
        Ok(())
    }

    /// Assign a port to a VLAN.
    pub fn assign_port(&mut self, id: u16, port_id: i32) -> Result<(), SwitchError> {
        let vlan = self.vlans.get_mut(&id).ok_or(SwitchError::VlanNotFound(id))?;
        vlan.member_ports.insert(port_id);
        Ok(())
    }

    /// Remove a port from a VLAN. A no-op if the port was never a member.
    pub fn remove_port(&mut self, id: u16, port_id: i32) -> Result<(), SwitchError> {
        let vlan = self.vlans.get_mut(&id).ok_or(SwitchError::VlanNotFound(id))?;
        vlan.member_ports.remove(&port_id);
        Ok(())
    }

    /// Look up a VLAN by id.
    pub fn get(&self, id: u16) -> Option<&Vlan> {
        self.vlans.get(&id)
    }

    /// Returns `true` if the given VLAN has been created.
    pub fn contains(&self, id: u16) -> bool {
        self.vlans.contains_key(&id)
    }

    /// Enumerate VLANs in ascending id order, each with ports in ascending order (the
    /// ordering `show_vlan` relies on).
    pub fn iter(&self) -> impl Iterator<Item = &Vlan> {
        self.vlans.values()
    }
}
