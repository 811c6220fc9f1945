//! Immutable run configuration.
//!
//! The CLI builds these value structs once; after `validate()` they are
//! shared read-only by the generator and handler for the whole run.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::packet::{MacAddr, DHCP_SERVER_PORT};

/// Stats tick used when the configured interval is not positive.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mac-count must be positive or at least one --mac given")]
    EmptyMacPool,

    #[error("relay mode needs both relay-source-ip and relay-target-server-ip")]
    IncompleteRelay,

    #[error("--{0} and --{1} cannot be combined")]
    Conflict(&'static str, &'static str),

    #[error("target port range {start}-{end} is empty")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("handshake mode {0} is not one of 0 (none), 1 (syn), 2 (full)")]
    InvalidHandshake(u8),

    #[error("unsolicited mode needs at least one --unsolicited-* flag")]
    NoUnsolicitedFlags,

    #[error("invalid API address '{0}'")]
    InvalidApiAddress(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport / run options
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub interface: String,
    /// Next-hop hardware address, already resolved.
    pub gateway_mac: MacAddr,
    pub promiscuous: bool,
    /// Send queue capacity; 0 makes `add_payload` a rendezvous with the writer.
    pub send_queue_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Requests per second ceiling; 0 is unlimited.
    pub rps: u64,
    /// Generator lifetime; zero runs until stopped.
    pub max_lifetime: Duration,
    pub stats_interval: Duration,
}

impl RunOptions {
    /// Stats interval from a signed seconds value, falling back to the default
    /// for zero or negative input.
    pub fn stats_interval_from_secs(secs: i64) -> Duration {
        if secs <= 0 {
            Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS)
        } else {
            Duration::from_secs(secs as u64)
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            rps: 0,
            max_lifetime: Duration::ZERO,
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DHCPv4
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpV4Options {
    /// Answer OFFERs with REQUEST (or DECLINE).
    pub handshake: bool,
    /// After an ACK, unicast INFORM.
    pub info: bool,
    /// After an ACK, unicast RELEASE.
    pub release: bool,
    /// Answer OFFERs with DECLINE instead of REQUEST.
    pub decline: bool,
    /// Set the BOOTP broadcast flag.
    pub dhcp_broadcast: bool,
    /// Send to ff:ff:ff:ff:ff:ff instead of the gateway MAC.
    pub ethernet_broadcast: bool,
    pub mac_count: usize,
    pub specified_macs: Vec<MacAddr>,
    /// Seed for the generated part of the MAC pool; 0 seeds from the clock.
    pub mac_seed: u64,
    /// Answer ARP requests for leased addresses.
    pub arp: bool,
    /// ARP replies claim the lease's client MAC rather than the interface MAC.
    pub arp_fake_mac: bool,
    /// Add leased addresses to the loopback interface.
    pub bind: bool,
    pub relay_source_ip: Option<Ipv4Addr>,
    pub relay_gateway_ip: Option<Ipv4Addr>,
    pub relay_target_server_ip: Option<Ipv4Addr>,
    pub target_port: u16,
    /// Extra options as `<code>:<base64>`; parsed (and possibly skipped) by
    /// the generator.
    pub additional_options: Vec<String>,
}

impl Default for DhcpV4Options {
    fn default() -> Self {
        Self {
            handshake: true,
            info: false,
            release: false,
            decline: false,
            dhcp_broadcast: true,
            ethernet_broadcast: true,
            mac_count: 1,
            specified_macs: Vec::new(),
            mac_seed: 0,
            arp: false,
            arp_fake_mac: false,
            bind: false,
            relay_source_ip: None,
            relay_gateway_ip: None,
            relay_target_server_ip: None,
            target_port: DHCP_SERVER_PORT,
            additional_options: Vec::new(),
        }
    }
}

/// Relay-agent addressing used instead of broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayAddressing {
    pub source_ip: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub target_server_ip: Ipv4Addr,
}

impl DhcpV4Options {
    /// Relay addressing, when both ends are configured. The relay-agent
    /// (giaddr) address defaults to the relay source.
    pub fn relay(&self) -> Option<RelayAddressing> {
        let source = self.relay_source_ip?;
        let target = self.relay_target_server_ip?;
        Some(RelayAddressing {
            source_ip: source,
            gateway_ip: self.relay_gateway_ip.unwrap_or(source),
            target_server_ip: target,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mac_count == 0 && self.specified_macs.is_empty() {
            return Err(ConfigError::EmptyMacPool);
        }
        if self.relay_source_ip.is_some() != self.relay_target_server_ip.is_some() {
            return Err(ConfigError::IncompleteRelay);
        }
        if self.release && self.info {
            return Err(ConfigError::Conflict("release", "info"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP
// ─────────────────────────────────────────────────────────────────────────────

/// How far the hammer drives each TCP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// No handshake: unsolicited frames with random flag combinations.
    None,
    /// Send SYNs only.
    Syn,
    /// Send SYNs and ACK every SYN+ACK.
    #[default]
    Full,
}

impl TryFrom<u8> for HandshakeMode {
    type Error = ConfigError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Syn),
            2 => Ok(Self::Full),
            other => Err(ConfigError::InvalidHandshake(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnOptions {
    pub handshake: HandshakeMode,
    /// Set ECE and CWR on SYNs.
    pub request_congestion_management: bool,
    pub use_push: bool,
    pub use_urgent: bool,
    pub unsolicited_syn_ack: bool,
    pub unsolicited_ack: bool,
    pub unsolicited_reset: bool,
    pub unsolicited_fin: bool,
    pub unsolicited_urgent: bool,
    pub unsolicited_push: bool,
    pub spoof_sources_file: Option<PathBuf>,
    pub target_server_ip: Ipv4Addr,
    pub target_port_start: u16,
    /// 0 pins every frame to `target_port_start`.
    pub target_port_end: u16,
}

impl Default for TcpConnOptions {
    fn default() -> Self {
        Self {
            handshake: HandshakeMode::Full,
            request_congestion_management: false,
            use_push: false,
            use_urgent: false,
            unsolicited_syn_ack: true,
            unsolicited_ack: true,
            unsolicited_reset: false,
            unsolicited_fin: false,
            unsolicited_urgent: false,
            unsolicited_push: false,
            spoof_sources_file: None,
            target_server_ip: Ipv4Addr::LOCALHOST,
            target_port_start: 80,
            target_port_end: 0,
        }
    }
}

impl TcpConnOptions {
    /// Enabled unsolicited flags as a 6-bit mask in draw order:
    /// SYN+ACK, ACK, RST, FIN, URG, PSH.
    pub fn unsolicited_mask(&self) -> u8 {
        [
            self.unsolicited_syn_ack,
            self.unsolicited_ack,
            self.unsolicited_reset,
            self.unsolicited_fin,
            self.unsolicited_urgent,
            self.unsolicited_push,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |mask, (bit, on)| if *on { mask | (1 << bit) } else { mask })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_port_end != 0 && self.target_port_end <= self.target_port_start {
            return Err(ConfigError::InvalidPortRange {
                start: self.target_port_start,
                end: self.target_port_end,
            });
        }
        if self.handshake == HandshakeMode::None && self.unsolicited_mask() == 0 {
            return Err(ConfigError::NoUnsolicitedFlags);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOptions {
    Dhcpv4(DhcpV4Options),
    TcpConn(TcpConnOptions),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HammerConfig {
    pub protocol: ProtocolOptions,
    pub transport: TransportOptions,
    pub run: RunOptions,
}

impl HammerConfig {
    /// Registry tag of the configured protocol.
    pub fn hammer_type(&self) -> &'static str {
        match self.protocol {
            ProtocolOptions::Dhcpv4(_) => crate::DHCPV4,
            ProtocolOptions::TcpConn(_) => crate::TCPCONN,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.protocol {
            ProtocolOptions::Dhcpv4(o) => o.validate(),
            ProtocolOptions::TcpConn(o) => o.validate(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
