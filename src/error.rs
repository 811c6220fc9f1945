//! Crate-wide error type.
//!
//! Fatal init failures are returned to the caller. Recoverable runtime
//! failures travel through the error sink as the same type and never stop a
//! loop.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::packet::PacketError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum HammerError {
    #[error("unknown hammer type '{0}'")]
    UnknownHammerType(String),

    #[error("{component} factory already registered for '{kind}'")]
    DuplicateRegistration {
        component: &'static str,
        kind: String,
    },

    #[error("'{kind}' factory received a '{actual}' configuration")]
    ConfigMismatch { kind: &'static str, actual: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("spoof source file {path}: {reason}")]
    SpoofSources { path: PathBuf, reason: String },

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("hammer has not been initialized")]
    NotInitialized,

    #[error("generator is not accepting updates")]
    NotRunning,

    #[error("loopback address {addr}: {reason}")]
    AddressBinding { addr: Ipv4Addr, reason: String },

    #[error("source address detection failed: {0}")]
    SourceAddress(String),

    #[error("gateway resolution failed: {0}")]
    Gateway(String),

    #[error("{0} thread panicked")]
    ThreadPanic(&'static str),
}
