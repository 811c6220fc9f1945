//! TCP reply handling: counts SYN+ACK, RST and FIN arrivals and, in full
//! handshake mode, completes each connection with an ACK.

use super::{Handler, MessageQueue};
use crate::config::{HandshakeMode, TcpConnOptions};
use crate::message::Message;
use crate::packet::frame::TcpView;
use crate::packet::{
    tcp_frame, EthernetHeader, Frame, Ipv4Header, MacAddr, TcpFlags, TcpSegment, ETHERTYPE_IPV4,
    IPPROTO_TCP,
};
use crate::sink::Sinks;
use crate::stats::StatKind;

/// NOP, NOP, SACK-permitted.
const ACK_OPTIONS: [u8; 4] = [0x01, 0x01, 0x04, 0x02];

pub struct TcpConnHandler {
    options: TcpConnOptions,
    iface_mac: MacAddr,
    sinks: Sinks,
    queue: MessageQueue,
}

impl TcpConnHandler {
    pub fn new(options: TcpConnOptions, iface_mac: MacAddr, sinks: Sinks) -> Self {
        Self {
            options,
            iface_mac,
            sinks,
            queue: MessageQueue::default(),
        }
    }

    fn handle(&self, msg: &Message) {
        let frame = &msg.frame;
        let Some(tcp) = frame.tcp() else {
            return;
        };
        let flags = tcp.flags();
        if flags.contains(TcpFlags::RST) {
            self.sinks.stat(StatKind::RstReceived);
        }
        if flags.contains(TcpFlags::FIN) {
            self.sinks.stat(StatKind::FinReceived);
        }
        if !flags.contains(TcpFlags::SYN | TcpFlags::ACK) {
            return;
        }
        self.sinks.stat(StatKind::SynAckReceived);
        if self.options.handshake == HandshakeMode::Full {
            self.send_ack(frame, &tcp);
        }
    }

    fn send_ack(&self, frame: &Frame, synack: &TcpView<'_>) {
        let (Some(eth), Some(ip)) = (frame.ethernet(), frame.ipv4()) else {
            return;
        };
        let eth = EthernetHeader {
            dst: eth.src,
            src: self.iface_mac,
            ethertype: ETHERTYPE_IPV4,
        };
        let ip = Ipv4Header {
            dont_fragment: true,
            ..Ipv4Header::new(ip.dst(), ip.src(), IPPROTO_TCP)
        };
        let mut seg = TcpSegment::new(synack.dst_port(), synack.src_port(), TcpFlags::ACK);
        seg.seq = synack.ack();
        seg.ack = synack.seq().wrapping_add(1);
        seg.options = ACK_OPTIONS.to_vec();

        if self.sinks.send(tcp_frame(&eth, &ip, &seg)) {
            self.sinks.stat(StatKind::AckSent);
            self.sinks.stat(StatKind::ConnEstablished);
        }
    }
}

impl Handler for TcpConnHandler {
    fn receive_message(&self, msg: Message) -> bool {
        self.queue.push(msg)
    }

    fn run(&self) {
        self.queue.run(|msg| self.handle(&msg));
    }

    fn stop(&self) {
        self.queue.close();
    }
}
