// fabrictwin: Ethernet switch fabric digital twin
//! MAC and ARP tables (§4.4).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

/// Port id meaning "this IP/MAC belongs to the local switch itself", used for ARP and
/// MAC entries that represent a switch's own L3 interfaces rather than a learned
/// neighbor.
pub const LOCAL_PORT: i32 = -1;

/// `mac -> port_id`. Last-seen wins on every insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacTable {
    entries: HashMap<MacAddress, i32>,
}

impl MacTable {
    /// Create an empty MAC table.
    pub fn new() -> MacTable {
        MacTable::default()
    }

    /// Learn (or relearn) a MAC address on a port. Last-seen wins.
    pub fn learn(&mut self, mac: MacAddress, port_id: i32) {
        self.entries.insert(mac, port_id);
    }

    /// Look up the port a MAC address was last seen on.
    pub fn lookup(&self, mac: &MacAddress) -> Option<i32> {
        self.entries.get(mac).copied()
    }

    /// Iterate all entries for `show mac-address-table`.
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddress, &i32)> {
        self.entries.iter()
    }
}

/// A single resolved ARP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    /// Resolved MAC address.
    pub mac: MacAddress,
    /// Egress port, or [`LOCAL_PORT`] if the IP is owned by this switch.
    pub port_id: i32,
}

/// `ip -> (mac, port_id)`. One entry per IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
}

impl ArpTable {
    /// Create an empty ARP table.
    pub fn new() -> ArpTable {
        ArpTable::default()
    }

    /// Record or update the resolution for an IP address.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddress, port_id: i32) {
        self.entries.insert(ip, ArpEntry { mac, port_id });
    }

    /// Look up a resolved entry.
    pub fn lookup(&self, ip: &Ipv4Addr) -> Option<ArpEntry> {
        self.entries.get(ip).copied()
    }

    /// Returns `true` if this IP has already been resolved.
    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.entries.contains_key(ip)
    }

    /// Iterate all entries for `show arp`.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Addr, &ArpEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_table_last_seen_wins() {
        let mut t = MacTable::new();
        let mac = MacAddress::generate("sw1", 1);
        t.learn(mac, 1);
        t.learn(mac, 2);
        assert_eq!(t.lookup(&mac), Some(2));
    }

    #[test]
    fn arp_table_one_entry_per_ip() {
        let mut t = ArpTable::new();
        let ip: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mac1 = MacAddress::generate("sw1", 1);
        let mac2 = MacAddress::generate("sw1", 2);
        t.learn(ip, mac1, 1);
        t.learn(ip, mac2, 2);
        let entry = t.lookup(&ip).unwrap();
        assert_eq!(entry.mac, mac2);
        assert_eq!(entry.port_id, 2);
    }

    #[test]
    fn local_port_marks_owned_ip() {
        let mut t = ArpTable::new();
        let ip: Ipv4Addr = "10.0.0.1".parse().unwrap();
        let mac = MacAddress::generate("sw1", 1);
        t.learn(ip, mac, LOCAL_PORT);
        assert_eq!(t.lookup(&ip).unwrap().port_id, LOCAL_PORT);
    }
}
