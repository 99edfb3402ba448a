// fabrictwin: Ethernet switch fabric digital twin
//! Fabric-wide tunables, loaded from an optional TOML scenario file.
//!
//! Mirrors the shape of `bgpsim::builder`'s parameterized builders -- tunables live as
//! struct fields with a `Default` impl rather than scattered module-level constants -- but
//! this twin's constants are process-wide rather than per-call, so they're gathered into
//! one config struct loaded once by the `supervisor` binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ospf::DEFAULT_REFERENCE_BW_MBPS;

/// Base Telnet port; switch `k` (0-based, in creation order) listens on `base + k`.
pub const DEFAULT_BASE_TELNET_PORT: u16 = 9000;

/// Default number of ports provisioned on a newly created switch.
pub const DEFAULT_PORT_COUNT: u16 = 24;

/// Minimum spacing between ARP requests for the same target IP, per §4.8.
pub const DEFAULT_ARP_RATE_LIMIT_MS: u64 = 1000;

/// How long a packet may wait in the pending-ARP queue before it is dropped, per §4.8.
pub const DEFAULT_PENDING_PACKET_TTL_MS: u64 = 5000;

/// Fabric-wide configuration, deserializable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Reference bandwidth for the OSPF cost metric (Mbps).
    pub reference_bw_mbps: u32,
    /// Number of ports a new switch is provisioned with.
    pub port_count: u16,
    /// Default port speed for newly created ports (Mbps).
    pub default_port_speed_mbps: u32,
    /// Base Telnet port; see [`DEFAULT_BASE_TELNET_PORT`].
    pub base_telnet_port: u16,
    /// ARP request rate-limit window, in milliseconds.
    pub arp_rate_limit_ms: u64,
    /// Pending-packet (ARP queue) expiry, in milliseconds.
    pub pending_packet_ttl_ms: u64,
}

impl Default for FabricConfig {
    fn default() -> FabricConfig {
        FabricConfig {
            reference_bw_mbps: DEFAULT_REFERENCE_BW_MBPS,
            port_count: DEFAULT_PORT_COUNT,
            default_port_speed_mbps: crate::port::DEFAULT_SPEED_MBPS,
            base_telnet_port: DEFAULT_BASE_TELNET_PORT,
            arp_rate_limit_ms: DEFAULT_ARP_RATE_LIMIT_MS,
            pending_packet_ttl_ms: DEFAULT_PENDING_PACKET_TTL_MS,
        }
    }
}

impl FabricConfig {
    /// Load a scenario file, falling back to defaults for any field it omits.
    pub fn load(path: &Path) -> Result<FabricConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }
}

/// Telnet port for the `k`-th switch to have its Telnet server started, per §6's port
/// numbering rule (`127.0.0.1:9000+k`). A pure function so the (out-of-scope) Telnet
/// layer can compute a port without depending on this crate's runtime state.
pub fn telnet_port_for_index(base_port: u16, k: usize) -> u16 {
    base_port.saturating_add(k as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = FabricConfig::default();
        assert_eq!(cfg.base_telnet_port, 9000);
        assert_eq!(cfg.reference_bw_mbps, 100_000);
        assert_eq!(cfg.arp_rate_limit_ms, 1000);
        assert_eq!(cfg.pending_packet_ttl_ms, 5000);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_from_default() {
        let cfg: FabricConfig = toml::from_str("port_count = 8\n").unwrap();
        assert_eq!(cfg.port_count, 8);
        assert_eq!(cfg.base_telnet_port, DEFAULT_BASE_TELNET_PORT);
    }

    #[test]
    fn telnet_port_numbering_matches_spec() {
        assert_eq!(telnet_port_for_index(9000, 0), 9000);
        assert_eq!(telnet_port_for_index(9000, 3), 9003);
    }
}
