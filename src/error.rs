// fabrictwin: Ethernet switch fabric digital twin
//! Error types shared across the forwarding and control planes.

use thiserror::Error;

/// Configuration-time errors raised by mutating operations on a [`crate::switch::Switch`].
///
/// Per the propagation policy, forwarding itself never raises: these are returned only
/// by operations that the (out-of-scope) CLI layer would surface to an operator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// The port id is not in the switch's valid port range.
    #[error("port {0} does not exist")]
    UnknownPort(i32),
    /// `link()` was attempted on a port that already has a peer.
    #[error("port {0} is already linked")]
    PortAlreadyLinked(i32),
    /// A VLAN operation referenced a VLAN id that has not been created.
    #[error("VLAN {0} does not exist")]
    VlanNotFound(u16),
    /// `create_vlan` was called with an id that already exists.
    #[error("VLAN {0} already exists")]
    DuplicateVlan(u16),
    /// A CIDR string could not be parsed.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
    /// An IP address string could not be parsed.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),
    /// A named route was not present in the routing table.
    #[error("route {0} not found")]
    RouteNotFound(String),
    /// The switch's background actor task has already shut down.
    #[error("switch actor has shut down")]
    ActorShutDown,
}

/// Errors raised by the process-scoped switch registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `add_node` was called with a name that is already registered.
    #[error("switch {0} already exists")]
    DuplicateSwitch(String),
    /// A lookup or link operation referenced a switch that isn't registered.
    #[error("switch {0} not found")]
    UnknownSwitch(String),
    /// The target switch rejected the operation.
    #[error("{0}")]
    Switch(#[from] SwitchError),
}

/// Errors raised while loading a [`crate::config::FabricConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The scenario file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The scenario file did not parse as valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
