// fabrictwin: Ethernet switch fabric digital twin
//! MAC address type.
//!
//! The twin does not encode real Ethernet frames, but the operator-visible tables
//! (`show mac-address-table`, `show arp`) render MAC addresses in canonical
//! colon-hex form, so a small typed wrapper beats passing raw `String`s around.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The broadcast MAC address `ff:ff:ff:ff:ff:ff`, used as the destination of ARP requests.
pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Deterministically derive a MAC address from a switch name and a small integer
    /// discriminator (interface index). Locally-administered (bit 0x02 set in the first
    /// octet) so it never collides with a "real" vendor OUI.
    pub fn generate(switch_name: &str, discriminator: u32) -> MacAddress {
        let mut hash: u32 = 2166136261; // FNV-1a seed
        for byte in switch_name.as_bytes() {
            hash ^= *byte as u32;
            hash = hash.wrapping_mul(16777619);
        }
        hash ^= discriminator.wrapping_mul(2654435761);
        let bytes = hash.to_be_bytes();
        MacAddress([0x02, bytes[0], bytes[1], bytes[2], bytes[3], discriminator as u8])
    }

    /// Returns `true` if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Error returned when parsing a [`MacAddress`] from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        Ok(MacAddress(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        let mac = MacAddress::generate("sw1", 1);
        let text = mac.to_string();
        let parsed: MacAddress = text.parse().unwrap();
        assert_eq!(mac, parsed);
    }

    #[test]
    fn broadcast_is_recognized() {
        assert!(BROADCAST.is_broadcast());
        assert_eq!(BROADCAST.to_string(), "ff:ff:ff:ff:ff:ff");
    }

    #[test]
    fn generate_is_deterministic_and_differs_by_discriminator() {
        let a = MacAddress::generate("sw1", 1);
        let b = MacAddress::generate("sw1", 1);
        let c = MacAddress::generate("sw1", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
