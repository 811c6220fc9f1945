//! Command-line definition and its translation into a [`HammerConfig`].

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{
    ConfigError, DhcpV4Options, HammerConfig, HandshakeMode, ProtocolOptions, RunOptions,
    TcpConnOptions, TransportOptions,
};
use crate::packet::MacAddr;

/// dhammer: raw-socket DHCPv4 and TCP load generator.
#[derive(Parser, Debug)]
#[command(name = "dhammer", version, about)]
#[command(
    long_about = "dhammer floods a network with DHCPv4 DISCOVERs or TCP connection attempts \
    over an AF_PACKET socket, optionally completing handshakes, and reports live counters. \
    Requires CAP_NET_RAW (and CAP_NET_ADMIN for --promisc and --bind)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Interface to send and capture on
    #[arg(long, global = true, default_value = "eth0")]
    pub interface: String,

    /// Next-hop MAC address, or "auto" to resolve the default gateway
    #[arg(long, global = true, default_value = "auto")]
    pub gateway_mac: String,

    /// Capture in promiscuous mode
    #[arg(long, global = true)]
    pub promisc: bool,

    /// Address for the HTTP API; empty disables it
    #[arg(long, global = true, default_value = "")]
    pub api_address: String,

    #[arg(long, global = true, default_value_t = 8080)]
    pub api_port: u16,

    /// Stats tick in seconds; values <= 0 fall back to 5
    #[arg(long, global = true, default_value_t = 5, allow_negative_numbers = true)]
    pub stats_rate: i64,

    /// Requests per second ceiling, 0 for unlimited (default: dhcpv4 0, tcpconn 1)
    #[arg(long, global = true)]
    pub rps: Option<u64>,

    /// Stop after this many seconds; 0 runs until interrupted
    #[arg(long, global = true, default_value_t = 0)]
    pub maxlife: u64,

    /// Outbound queue slots; 0 hands each frame straight to the writer
    #[arg(long, global = true, default_value_t = 0)]
    pub send_queue_depth: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// DHCPv4 DISCOVER flood with optional REQUEST/ACK handling
    Dhcpv4(DhcpV4Args),
    /// TCP SYN or unsolicited-segment flood
    Tcpconn(TcpConnArgs),
}

#[derive(Args, Debug)]
pub struct DhcpV4Args {
    /// Answer OFFERs with REQUEST
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub handshake: bool,
    /// Send INFORM after each ACK
    #[arg(long)]
    pub info: bool,
    /// Set the BOOTP broadcast flag
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub dhcp_broadcast: bool,
    /// Send to ff:ff:ff:ff:ff:ff instead of the gateway MAC
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub ethernet_broadcast: bool,
    /// Send RELEASE after each ACK
    #[arg(long)]
    pub release: bool,
    /// Answer OFFERs with DECLINE
    #[arg(long)]
    pub decline: bool,
    /// Size of the client MAC pool
    #[arg(long, default_value_t = 1)]
    pub mac_count: usize,
    /// Client MAC to include in the pool (repeatable)
    #[arg(long = "mac")]
    pub macs: Vec<MacAddr>,
    /// Seed for generated MACs; 0 seeds from the clock
    #[arg(long, default_value_t = 0)]
    pub mac_seed: u64,
    /// Answer ARP requests for leased addresses
    #[arg(long)]
    pub arp: bool,
    /// Answer ARP with the lease's client MAC
    #[arg(long)]
    pub arp_fake_mac: bool,
    /// Add leased addresses to the loopback interface
    #[arg(long)]
    pub bind: bool,
    #[arg(long)]
    pub relay_source_ip: Option<Ipv4Addr>,
    /// Relay agent address (giaddr); defaults to --relay-source-ip
    #[arg(long)]
    pub relay_gateway_ip: Option<Ipv4Addr>,
    #[arg(long)]
    pub relay_target_server_ip: Option<Ipv4Addr>,
    #[arg(long, default_value_t = 67)]
    pub target_port: u16,
    /// Extra option as <code>:<base64> (repeatable)
    #[arg(long = "dhcp-option")]
    pub dhcp_options: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TcpConnArgs {
    /// 0 unsolicited segments, 1 SYN only, 2 full handshake
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub handshake: u8,
    /// Set ECE and CWR on SYNs
    #[arg(long = "request-congestion-mgmt")]
    pub request_congestion_management: bool,
    #[arg(long)]
    pub use_push: bool,
    #[arg(long)]
    pub use_urgent: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub unsolicited_syn_ack: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub unsolicited_ack: bool,
    #[arg(long)]
    pub unsolicited_reset: bool,
    #[arg(long)]
    pub unsolicited_fin: bool,
    #[arg(long)]
    pub unsolicited_urgent: bool,
    #[arg(long)]
    pub unsolicited_push: bool,
    /// File of source IPv4 addresses, one per line
    #[arg(long)]
    pub spoof_sources_file: Option<PathBuf>,
    #[arg(long, default_value_t = Ipv4Addr::LOCALHOST)]
    pub target_server_ip: Ipv4Addr,
    #[arg(long = "target-port-range-start", default_value_t = 80)]
    pub target_port_start: u16,
    /// End of the target port range (exclusive); 0 uses only the start port
    #[arg(long = "target-port-range-end", default_value_t = 0)]
    pub target_port_end: u16,
}

impl DhcpV4Args {
    pub fn options(&self) -> DhcpV4Options {
        DhcpV4Options {
            handshake: self.handshake,
            info: self.info,
            release: self.release,
            decline: self.decline,
            dhcp_broadcast: self.dhcp_broadcast,
            ethernet_broadcast: self.ethernet_broadcast,
            mac_count: self.mac_count,
            specified_macs: self.macs.clone(),
            mac_seed: self.mac_seed,
            arp: self.arp,
            arp_fake_mac: self.arp_fake_mac,
            bind: self.bind,
            relay_source_ip: self.relay_source_ip,
            relay_gateway_ip: self.relay_gateway_ip,
            relay_target_server_ip: self.relay_target_server_ip,
            target_port: self.target_port,
            additional_options: self.dhcp_options.clone(),
        }
    }
}

impl TcpConnArgs {
    pub fn options(&self) -> Result<TcpConnOptions, ConfigError> {
        Ok(TcpConnOptions {
            handshake: HandshakeMode::try_from(self.handshake)?,
            request_congestion_management: self.request_congestion_management,
            use_push: self.use_push,
            use_urgent: self.use_urgent,
            unsolicited_syn_ack: self.unsolicited_syn_ack,
            unsolicited_ack: self.unsolicited_ack,
            unsolicited_reset: self.unsolicited_reset,
            unsolicited_fin: self.unsolicited_fin,
            unsolicited_urgent: self.unsolicited_urgent,
            unsolicited_push: self.unsolicited_push,
            spoof_sources_file: self.spoof_sources_file.clone(),
            target_server_ip: self.target_server_ip,
            target_port_start: self.target_port_start,
            target_port_end: self.target_port_end,
        })
    }
}

impl Cli {
    /// Full, validated run configuration. `gateway_mac` is the already
    /// resolved `--gateway-mac`.
    pub fn hammer_config(&self, gateway_mac: MacAddr) -> Result<HammerConfig, ConfigError> {
        let (protocol, default_rps) = match &self.command {
            Commands::Dhcpv4(args) => (ProtocolOptions::Dhcpv4(args.options()), 0),
            Commands::Tcpconn(args) => (ProtocolOptions::TcpConn(args.options()?), 1),
        };
        let config = HammerConfig {
            protocol,
            transport: TransportOptions {
                interface: self.interface.clone(),
                gateway_mac,
                promiscuous: self.promisc,
                send_queue_depth: self.send_queue_depth,
            },
            run: RunOptions {
                rps: self.rps.unwrap_or(default_rps),
                max_lifetime: Duration::from_secs(self.maxlife),
                stats_interval: RunOptions::stats_interval_from_secs(self.stats_rate),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// `None` when the API is disabled.
    pub fn api_socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        if self.api_address.is_empty() {
            return Ok(None);
        }
        let ip = self
            .api_address
            .parse()
            .map_err(|_| ConfigError::InvalidApiAddress(self.api_address.clone()))?;
        Ok(Some(SocketAddr::new(ip, self.api_port)))
    }
}
