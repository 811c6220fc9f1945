//! DHCPv4 DISCOVER generator and the output-layer template it shares with
//! the DHCPv4 handler.

use std::net::Ipv4Addr;

use parking_lot::Mutex;
use rand::Rng;

use super::{generate_mac_pool, Generator, LoopExit, SendLoop};
use crate::config::{DhcpV4Options, RunOptions};
use crate::error::HammerError;
use crate::packet::dhcp::{
    DEFAULT_PARAMETER_REQUEST_LIST, OPT_MESSAGE_TYPE, OPT_PARAMETER_REQUEST_LIST,
};
use crate::packet::{
    udp_frame, DhcpMessage, DhcpMessageType, DhcpOption, EthernetHeader, Ipv4Header, MacAddr,
    PacketError, UdpHeader, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, ETHERTYPE_IPV4, IPPROTO_UDP,
};
use crate::sink::Sinks;
use crate::stats::StatKind;

// ─────────────────────────────────────────────────────────────────────────────
// Output template
// ─────────────────────────────────────────────────────────────────────────────

/// Ethernet/IPv4/UDP addressing for client-originated DHCP messages.
///
/// Built once from the options; per-message variations (unicast RELEASE and
/// INFORM) are made on a copy so the shared template never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpTemplate {
    pub eth: EthernetHeader,
    pub ip: Ipv4Header,
    pub udp: UdpHeader,
    /// Relay agent address written into every message.
    pub giaddr: Ipv4Addr,
    /// BOOTP broadcast flag.
    pub broadcast: bool,
}

impl DhcpTemplate {
    pub fn new(opts: &DhcpV4Options, iface_mac: MacAddr, gateway_mac: MacAddr) -> Self {
        let eth = |dst| EthernetHeader {
            dst,
            src: iface_mac,
            ethertype: ETHERTYPE_IPV4,
        };
        match opts.relay() {
            Some(relay) => Self {
                eth: eth(gateway_mac),
                ip: Ipv4Header::new(relay.source_ip, relay.target_server_ip, IPPROTO_UDP),
                udp: UdpHeader {
                    src_port: DHCP_SERVER_PORT,
                    dst_port: opts.target_port,
                },
                giaddr: relay.gateway_ip,
                broadcast: opts.dhcp_broadcast,
            },
            None => Self {
                eth: eth(if opts.ethernet_broadcast {
                    MacAddr::BROADCAST
                } else {
                    gateway_mac
                }),
                ip: Ipv4Header::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST, IPPROTO_UDP),
                udp: UdpHeader {
                    src_port: DHCP_CLIENT_PORT,
                    dst_port: opts.target_port,
                },
                giaddr: Ipv4Addr::UNSPECIFIED,
                broadcast: opts.dhcp_broadcast,
            },
        }
    }

    /// Apply relay and broadcast fields to `msg` and serialize the full frame.
    pub fn build(&self, msg: &mut DhcpMessage) -> Result<Vec<u8>, PacketError> {
        msg.giaddr = self.giaddr;
        msg.set_broadcast(self.broadcast);
        let payload = msg.encode()?;
        Ok(udp_frame(&self.eth, &self.ip, &self.udp, &payload))
    }

    /// Copy addressed straight at one server, sent from the leased address.
    pub fn unicast(&self, server_mac: MacAddr, server_ip: Ipv4Addr, client_ip: Ipv4Addr) -> Self {
        Self {
            eth: EthernetHeader {
                dst: server_mac,
                ..self.eth
            },
            ip: Ipv4Header::new(client_ip, server_ip, IPPROTO_UDP),
            udp: UdpHeader {
                src_port: DHCP_CLIENT_PORT,
                dst_port: self.udp.dst_port,
            },
            giaddr: Ipv4Addr::UNSPECIFIED,
            broadcast: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

pub struct DhcpV4Generator {
    options: DhcpV4Options,
    template: DhcpTemplate,
    sinks: Sinks,
    send_loop: SendLoop,
    mac_pool: Mutex<Vec<MacAddr>>,
    extra_options: Mutex<Vec<DhcpOption>>,
}

impl DhcpV4Generator {
    pub fn new(
        options: DhcpV4Options,
        run: &RunOptions,
        iface_mac: MacAddr,
        gateway_mac: MacAddr,
        sinks: Sinks,
    ) -> Self {
        let template = DhcpTemplate::new(&options, iface_mac, gateway_mac);
        Self {
            options,
            template,
            sinks,
            send_loop: SendLoop::new(run),
            mac_pool: Mutex::new(Vec::new()),
            extra_options: Mutex::new(Vec::new()),
        }
    }

    pub fn template(&self) -> &DhcpTemplate {
        &self.template
    }

    fn discover(&self, xid: u32, chaddr: MacAddr, extra: &[DhcpOption]) -> DhcpMessage {
        let mut msg = DhcpMessage::request(xid, chaddr);
        msg.push_option(DhcpOption::new(
            OPT_MESSAGE_TYPE,
            [DhcpMessageType::Discover as u8],
        ));
        msg.push_option(DhcpOption::new(
            OPT_PARAMETER_REQUEST_LIST,
            DEFAULT_PARAMETER_REQUEST_LIST,
        ));
        msg.options.extend_from_slice(extra);
        msg
    }
}

impl Generator for DhcpV4Generator {
    fn init(&self) -> Result<(), HammerError> {
        let pool = generate_mac_pool(
            self.options.mac_count,
            &self.options.specified_macs,
            self.options.mac_seed,
        );
        tracing::debug!(macs = pool.len(), "client MAC pool ready");
        *self.mac_pool.lock() = pool;

        let mut extra = Vec::new();
        for entry in &self.options.additional_options {
            match DhcpOption::parse_encoded(entry) {
                Ok(opt) => extra.push(opt),
                Err(e @ PacketError::UnsupportedOptionCode { .. }) => {
                    self.sinks.log(format!("skipping DHCP option: {e}"));
                }
                Err(e) => {
                    self.sinks.error(e);
                }
            }
        }
        *self.extra_options.lock() = extra;
        Ok(())
    }

    fn run(&self) {
        let pool = self.mac_pool.lock().clone();
        let extra = self.extra_options.lock().clone();
        if pool.is_empty() {
            self.sinks.log("DHCPv4 generator has no client MACs; not sending");
            return;
        }
        let mut rng = rand::thread_rng();
        let mut next_mac = 0usize;

        let exit = self.send_loop.run(|| {
            let chaddr = pool[next_mac];
            let mut msg = self.discover(rng.gen(), chaddr, &extra);
            match self.template.build(&mut msg) {
                Ok(frame) => {
                    if self.sinks.send(frame) {
                        self.sinks.stat(StatKind::DiscoverSent);
                    }
                    next_mac = (next_mac + 1) % pool.len();
                    true
                }
                Err(e) => {
                    self.sinks.error(e);
                    false
                }
            }
        });
        if exit == LoopExit::LifetimeElapsed {
            self.sinks.log("DHCPv4 generator reached its max lifetime");
        }
    }

    fn stop(&self) {
        self.send_loop.stop();
    }

    fn update(&self, update: &serde_json::Value) -> Result<(), HammerError> {
        self.send_loop.update(update)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame;
    use crate::sink::testing::Recorded;
    use std::time::Duration;

    const IFACE_MAC: MacAddr = MacAddr([0x02, 0, 0x5e, 0x10, 0, 1]);
    const GW_MAC: MacAddr = MacAddr([0x02, 0, 0x5e, 0x10, 0, 0xfe]);

    fn run_options(rps: u64, lifetime_ms: u64) -> RunOptions {
        RunOptions {
            rps,
            max_lifetime: Duration::from_millis(lifetime_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_broadcast_template_layout() {
        let t = DhcpTemplate::new(&DhcpV4Options::default(), IFACE_MAC, GW_MAC);
        assert_eq!(t.eth.dst, MacAddr::BROADCAST);
        assert_eq!(t.ip.src, Ipv4Addr::UNSPECIFIED);
        assert_eq!(t.ip.dst, Ipv4Addr::BROADCAST);
        assert_eq!(t.udp.src_port, DHCP_CLIENT_PORT);
        assert_eq!(t.udp.dst_port, DHCP_SERVER_PORT);

        let unicast_eth = DhcpTemplate::new(
            &DhcpV4Options {
                ethernet_broadcast: false,
                ..Default::default()
            },
            IFACE_MAC,
            GW_MAC,
        );
        assert_eq!(unicast_eth.eth.dst, GW_MAC);
    }

    #[test]
    fn test_relay_addressing() {
        let opts = DhcpV4Options {
            relay_source_ip: Some(Ipv4Addr::new(10, 0, 0, 2)),
            relay_gateway_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            relay_target_server_ip: Some(Ipv4Addr::new(192, 168, 50, 5)),
            ..Default::default()
        };
        let rec = Recorded::default();
        let gen = DhcpV4Generator::new(opts, &run_options(0, 50), IFACE_MAC, GW_MAC, rec.sinks());
        gen.init().unwrap();
        gen.run();

        let frames = rec.frames.lock();
        assert!(!frames.is_empty());
        let frame = Frame::new(frames[0].clone());
        assert_eq!(frame.ethernet().unwrap().dst, GW_MAC);
        let ip = frame.ipv4().unwrap();
        assert_eq!(ip.src(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ip.dst(), Ipv4Addr::new(192, 168, 50, 5));
        let udp = frame.udp().unwrap();
        assert_eq!(udp.src_port(), DHCP_SERVER_PORT, "relays send from port 67");
        let msg = frame.dhcpv4().unwrap();
        assert_eq!(msg.giaddr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn test_unicast_copy_leaves_template_untouched() {
        let t = DhcpTemplate::new(&DhcpV4Options::default(), IFACE_MAC, GW_MAC);
        let before = t.clone();
        let server_mac = MacAddr([0x02, 0, 0, 0, 0, 0x67]);
        let u = t.unicast(
            server_mac,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 50),
        );
        assert_eq!(t, before);
        assert_eq!(u.eth.dst, server_mac);
        assert_eq!(u.eth.src, IFACE_MAC);
        assert_eq!(u.ip.src, Ipv4Addr::new(192, 168, 1, 50));
        assert!(!u.broadcast);

        let mut msg = DhcpMessage::request(7, MacAddr([0x02, 0, 0, 0, 0, 9]));
        let frame = Frame::new(u.build(&mut msg).unwrap());
        assert_eq!(frame.dhcpv4().unwrap().flags, 0, "unicast clears the broadcast flag");
    }

    #[test]
    fn test_discovers_round_robin_over_pool() {
        let opts = DhcpV4Options {
            mac_count: 3,
            mac_seed: 11,
            ..Default::default()
        };
        let rec = Recorded::default();
        let gen = DhcpV4Generator::new(opts, &run_options(0, 30), IFACE_MAC, GW_MAC, rec.sinks());
        gen.init().unwrap();
        let pool = gen.mac_pool.lock().clone();
        gen.run();

        let frames = rec.frames.lock();
        assert!(frames.len() >= 6);
        for (i, raw) in frames.iter().take(6).enumerate() {
            let msg = Frame::new(raw.clone()).dhcpv4().unwrap();
            assert_eq!(msg.chaddr, pool[i % 3]);
            assert_ne!(msg.flags & crate::packet::dhcp::FLAG_BROADCAST, 0);
        }
        assert_eq!(rec.count(StatKind::DiscoverSent), frames.len());
    }

    #[test]
    fn test_additional_options_skip_bad_entries() {
        let opts = DhcpV4Options {
            additional_options: vec![
                "60:ZGhhbW1lcg==".to_string(), // "dhammer"
                "300:AAAA".to_string(),
                "255:AAAA".to_string(),
                "61:not base64!".to_string(),
            ],
            ..Default::default()
        };
        let rec = Recorded::default();
        let gen = DhcpV4Generator::new(opts, &run_options(0, 10), IFACE_MAC, GW_MAC, rec.sinks());
        gen.init().unwrap();
        assert_eq!(gen.extra_options.lock().len(), 1);
        assert_eq!(rec.logs.lock().len(), 2, "code above 255 and END are logged");
        assert_eq!(rec.errors.lock().len(), 1, "bad base64 is an error");

        gen.run();
        let frames = rec.frames.lock();
        let msg = Frame::new(frames[0].clone()).dhcpv4().unwrap();
        assert_eq!(msg.option(60), Some(&b"dhammer"[..]));
    }

    #[test]
    fn test_lifetime_bounds_discovers() {
        let rec = Recorded::default();
        let gen = DhcpV4Generator::new(
            DhcpV4Options::default(),
            &run_options(10, 500),
            IFACE_MAC,
            GW_MAC,
            rec.sinks(),
        );
        gen.init().unwrap();
        gen.run();
        let sent = rec.count(StatKind::DiscoverSent);
        assert!((1..=6).contains(&sent), "10 rps for 0.5 s, got {sent}");
        assert!(gen.update(&serde_json::json!({"rps": 20})).is_err());
    }
}
