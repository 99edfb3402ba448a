// fabrictwin: Ethernet switch fabric digital twin
//! Simulated packet model (§4.0 data model, §9 design notes).
//!
//! The source models payloads as a dynamically-typed dictionary keyed by `"type"`. Per
//! §9 ("Tagged packet payloads"), this twin instead uses a discriminated union so every
//! `receive` match is exhaustive and checked at compile time.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;

/// The tagged payload of a simulated packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// ICMP echo request.
    Ping {
        /// Sequence number, 1-based.
        seq: u32,
    },
    /// ICMP echo reply.
    PingReply {
        /// Sequence number this reply answers.
        seq: u32,
    },
    /// ARP request: "who has `target_ip`?".
    ArpRequest {
        /// The IP address being resolved.
        target_ip: Ipv4Addr,
    },
    /// ARP reply: "`target_ip` is at `mac`".
    ArpReply {
        /// The resolved MAC address.
        mac: MacAddress,
    },
    /// Any payload not otherwise modeled; carried opaquely.
    Opaque {
        /// Raw bytes, uninterpreted by the forwarding engine.
        bytes: Vec<u8>,
    },
}

/// A simulated frame traversing the fabric.
///
/// `src_mac`/`src_ip` always correspond to the sender's egress interface for this hop's
/// originating switch, not necessarily the ultimate packet originator once a packet has
/// been re-written at an L3 hop (matching real router behavior: the MAC changes per hop,
/// the IP payload fields do not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Source IP address.
    pub src_ip: Ipv4Addr,
    /// Destination IP address.
    pub dst_ip: Ipv4Addr,
    /// Source MAC address for this hop.
    pub src_mac: MacAddress,
    /// Destination MAC address for this hop.
    pub dst_mac: MacAddress,
    /// Optional VLAN tag.
    pub vlan_tag: Option<u16>,
    /// The tagged payload.
    pub payload: Payload,
}

impl Packet {
    /// Construct a new packet.
    pub fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_mac: MacAddress,
        dst_mac: MacAddress,
        vlan_tag: Option<u16>,
        payload: Payload,
    ) -> Packet {
        Packet {
            src_ip,
            dst_ip,
            src_mac,
            dst_mac,
            vlan_tag,
            payload,
        }
    }

    /// Returns `true` if the payload is an ARP request or reply (the only payloads that
    /// drive MAC/ARP learning per §4.4).
    pub fn is_arp(&self) -> bool {
        matches!(self.payload, Payload::ArpRequest { .. } | Payload::ArpReply { .. })
    }
}
