// fabrictwin: Ethernet switch fabric digital twin
//! A digital twin of an Ethernet switch fabric: emulated L2/L3 switches wired into an
//! arbitrary topology, running a simplified OSPF-style link-state routing protocol and
//! carrying simulated ARP/ICMP frames hop by hop through the virtual data plane.
//!
//! The operator CLI grammar, its Telnet transport, and the interactive lab supervisor's
//! command loop are external collaborators; this crate exposes the operations they would
//! drive ([`Switch`]'s configuration methods and `show_*` renderers, [`SwitchRegistry`] for
//! topology construction) without implementing a line-editing shell.

pub mod config;
pub mod error;
pub mod l3_interface;
pub mod mac;
pub mod ospf;
pub mod packet;
pub mod port;
pub mod registry;
pub mod routing;
pub mod switch;
pub mod tables;
pub mod vlan;

pub use config::FabricConfig;
pub use error::{ConfigError, RegistryError, SwitchError};
pub use registry::{SwitchHandle, SwitchRegistry};
pub use switch::{PingAttempt, PingReport, Switch, SwitchTiming};
