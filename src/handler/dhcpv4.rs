//! DHCPv4 reply handling: completes handshakes, tracks leases, answers ARP
//! for leased addresses and optionally binds them to loopback.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

use super::{Handler, MessageQueue};
use crate::config::DhcpV4Options;
use crate::error::HammerError;
use crate::generator::dhcpv4::DhcpTemplate;
use crate::message::Message;
use crate::packet::dhcp::{
    BOOTREPLY, DEFAULT_PARAMETER_REQUEST_LIST, OPT_MESSAGE_TYPE, OPT_PARAMETER_REQUEST_LIST,
    OPT_REQUESTED_IP, OPT_SERVER_ID,
};
use crate::packet::{
    arp_frame, ArpPacket, DhcpMessage, DhcpMessageType, DhcpOption, EthernetHeader, Frame,
    MacAddr, ETHERTYPE_ARP,
};
use crate::sink::Sinks;
use crate::stats::StatKind;

// ─────────────────────────────────────────────────────────────────────────────
// Loopback binding
// ─────────────────────────────────────────────────────────────────────────────

/// Adds and removes leased addresses on the host.
pub trait AddressBinder: Send + Sync {
    fn bind(&self, addr: Ipv4Addr) -> Result<(), HammerError>;
    fn unbind(&self, addr: Ipv4Addr) -> Result<(), HammerError>;
}

/// `ip addr add|del <addr>/32 dev <device>`.
#[derive(Debug, Clone)]
pub struct IpCommandBinder {
    device: String,
}

impl Default for IpCommandBinder {
    fn default() -> Self {
        Self {
            device: "lo".to_string(),
        }
    }
}

impl IpCommandBinder {
    fn run(&self, action: &str, addr: Ipv4Addr) -> Result<(), HammerError> {
        let output = std::process::Command::new("ip")
            .args(["addr", action, &format!("{addr}/32"), "dev", &self.device])
            .output()
            .map_err(|e| HammerError::AddressBinding {
                addr,
                reason: format!("spawn ip: {e}"),
            })?;
        if !output.status.success() {
            return Err(HammerError::AddressBinding {
                addr,
                reason: format!(
                    "ip addr {action} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

impl AddressBinder for IpCommandBinder {
    fn bind(&self, addr: Ipv4Addr) -> Result<(), HammerError> {
        self.run("add", addr)
    }

    fn unbind(&self, addr: Ipv4Addr) -> Result<(), HammerError> {
        self.run("del", addr)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Leases
// ─────────────────────────────────────────────────────────────────────────────

/// One acquired address.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The ACK that granted it.
    pub frame: Frame,
    pub client_mac: MacAddr,
    pub bound: bool,
    pub acquired: DateTime<Utc>,
}

pub struct DhcpV4Handler {
    options: DhcpV4Options,
    template: DhcpTemplate,
    iface_mac: MacAddr,
    sinks: Sinks,
    binder: Arc<dyn AddressBinder>,
    leases: Mutex<HashMap<Ipv4Addr, Lease>>,
    queue: MessageQueue,
}

impl DhcpV4Handler {
    pub fn new(
        options: DhcpV4Options,
        iface_mac: MacAddr,
        gateway_mac: MacAddr,
        sinks: Sinks,
    ) -> Self {
        Self::with_binder(
            options,
            iface_mac,
            gateway_mac,
            sinks,
            Arc::new(IpCommandBinder::default()),
        )
    }

    pub fn with_binder(
        options: DhcpV4Options,
        iface_mac: MacAddr,
        gateway_mac: MacAddr,
        sinks: Sinks,
        binder: Arc<dyn AddressBinder>,
    ) -> Self {
        let template = DhcpTemplate::new(&options, iface_mac, gateway_mac);
        Self {
            options,
            template,
            iface_mac,
            sinks,
            binder,
            leases: Mutex::new(HashMap::new()),
            queue: MessageQueue::default(),
        }
    }

    pub fn lease(&self, addr: Ipv4Addr) -> Option<Lease> {
        self.leases.lock().get(&addr).cloned()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.lock().len()
    }

    fn handle(&self, msg: &Message) {
        let frame = &msg.frame;
        if self.options.arp {
            if let Some(arp) = frame.arp() {
                self.handle_arp(&arp);
                return;
            }
        }
        let Some(reply) = frame.dhcpv4() else {
            return;
        };
        if reply.op != BOOTREPLY {
            return;
        }
        match reply.message_type() {
            Some(DhcpMessageType::Offer) => self.handle_offer(&reply),
            Some(DhcpMessageType::Ack) => self.handle_ack(frame, &reply),
            Some(DhcpMessageType::Nak) => {
                self.sinks.stat(StatKind::NakReceived);
            }
            _ => {}
        }
    }

    fn handle_arp(&self, req: &ArpPacket) {
        if req.operation != ArpPacket::REQUEST {
            return;
        }
        let sender_hw = {
            let leases = self.leases.lock();
            let Some(lease) = leases.get(&req.target_ip) else {
                return;
            };
            if self.options.arp_fake_mac {
                lease.client_mac
            } else {
                self.iface_mac
            }
        };
        self.sinks.stat(StatKind::ArpRequestReceived);

        let eth = EthernetHeader {
            dst: req.sender_hw,
            src: self.iface_mac,
            ethertype: ETHERTYPE_ARP,
        };
        let reply = ArpPacket {
            operation: ArpPacket::REPLY,
            sender_hw,
            sender_ip: req.target_ip,
            target_hw: req.sender_hw,
            target_ip: req.sender_ip,
        };
        if self.sinks.send(arp_frame(&eth, &reply)) {
            self.sinks.stat(StatKind::ArpReplySent);
        }
    }

    fn handle_offer(&self, offer: &DhcpMessage) {
        self.sinks.stat(StatKind::OfferReceived);
        if !self.options.handshake {
            return;
        }
        let (kind, stat) = if self.options.decline {
            (DhcpMessageType::Decline, StatKind::DeclineSent)
        } else {
            (DhcpMessageType::Request, StatKind::RequestSent)
        };

        let mut msg = DhcpMessage::request(offer.xid, offer.chaddr);
        msg.push_option(DhcpOption::new(OPT_MESSAGE_TYPE, [kind as u8]));
        msg.push_option(DhcpOption::new(OPT_REQUESTED_IP, offer.yiaddr.octets()));
        if let Some(server) = offer.server_identifier() {
            msg.push_option(DhcpOption::new(OPT_SERVER_ID, server.octets()));
        }
        if kind == DhcpMessageType::Request {
            msg.push_option(DhcpOption::new(
                OPT_PARAMETER_REQUEST_LIST,
                DEFAULT_PARAMETER_REQUEST_LIST,
            ));
        }
        self.send(&self.template, &mut msg, stat);
    }

    fn handle_ack(&self, frame: &Frame, ack: &DhcpMessage) {
        self.sinks.stat(StatKind::AckReceived);
        let addr = ack.yiaddr;

        if self.options.arp || self.options.bind {
            let mut leases = self.leases.lock();
            if !leases.contains_key(&addr) {
                let bound = self.options.bind
                    && match self.binder.bind(addr) {
                        Ok(()) => true,
                        Err(e) => {
                            self.sinks.error(e);
                            false
                        }
                    };
                leases.insert(
                    addr,
                    Lease {
                        frame: frame.clone(),
                        client_mac: ack.chaddr,
                        bound,
                        acquired: Utc::now(),
                    },
                );
            }
        }

        if self.options.release || self.options.info {
            self.send_unicast_followup(frame, ack);
        }
    }

    /// RELEASE or INFORM, unicast to the server that sent the ACK.
    fn send_unicast_followup(&self, frame: &Frame, ack: &DhcpMessage) {
        let (Some(eth), Some(ip)) = (frame.ethernet(), frame.ipv4()) else {
            return;
        };
        let server_ip = ack.server_identifier().unwrap_or_else(|| ip.src());
        let (kind, stat) = if self.options.release {
            (DhcpMessageType::Release, StatKind::ReleaseSent)
        } else {
            (DhcpMessageType::Inform, StatKind::InfoSent)
        };

        let mut msg = DhcpMessage::request(rand::thread_rng().gen(), ack.chaddr);
        msg.ciaddr = ack.yiaddr;
        msg.push_option(DhcpOption::new(OPT_MESSAGE_TYPE, [kind as u8]));
        msg.push_option(DhcpOption::new(OPT_SERVER_ID, server_ip.octets()));
        if kind == DhcpMessageType::Inform {
            msg.push_option(DhcpOption::new(
                OPT_PARAMETER_REQUEST_LIST,
                DEFAULT_PARAMETER_REQUEST_LIST,
            ));
        }
        let unicast = self.template.unicast(eth.src, ip.src(), ack.yiaddr);
        self.send(&unicast, &mut msg, stat);
    }

    fn send(&self, template: &DhcpTemplate, msg: &mut DhcpMessage, stat: StatKind) {
        match template.build(msg) {
            Ok(frame) => {
                if self.sinks.send(frame) {
                    self.sinks.stat(stat);
                }
            }
            Err(e) => {
                self.sinks.error(e);
            }
        }
    }
}

impl Handler for DhcpV4Handler {
    fn receive_message(&self, msg: Message) -> bool {
        self.queue.push(msg)
    }

    fn run(&self) {
        self.queue.run(|msg| self.handle(&msg));
    }

    fn stop(&self) {
        self.queue.close();
    }

    fn deinit(&self) -> Result<(), HammerError> {
        let mut leases = self.leases.lock();
        for (addr, lease) in leases.drain() {
            if lease.bound {
                if let Err(e) = self.binder.unbind(addr) {
                    self.sinks.error(e);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
