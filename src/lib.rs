//! dhammer: DHCPv4 and TCP load generation over raw link-layer sockets.
//!
//! A hammer is one generator (rate-governed probe loop), one handler
//! (reacts to replies), one stats table and one transport (AF_PACKET socket
//! with separate listener and writer loops). [`Hammer`] builds them from the
//! [`Registry`], runs each loop on its own thread and shuts them down in
//! order. Usable as a library or via the `dhammer` binary.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod generator;
pub mod hammer;
pub mod handler;
pub mod message;
pub mod packet;
pub mod registry;
pub mod shutdown;
pub mod sink;
pub mod stats;
pub mod transport;

/// Registry tag of the DHCPv4 hammer.
pub const DHCPV4: &str = "dhcpv4";
/// Registry tag of the TCP connection hammer.
pub const TCPCONN: &str = "tcpconn";

pub use config::{HammerConfig, ProtocolOptions};
pub use error::HammerError;
pub use hammer::{Hammer, HammerHandle};
pub use registry::Registry;
pub use stats::{StatKind, StatsSnapshot};
