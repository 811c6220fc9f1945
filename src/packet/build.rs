//! Frame builders.
//!
//! Each `*_frame` function writes a complete Ethernet frame into a fresh
//! buffer, fixing up IPv4 total length, UDP length, TCP data offset and every
//! checksum, so callers only describe header fields.

use std::net::Ipv4Addr;
use std::ops::{BitOr, BitOrAssign};

use super::{
    compute_ip_checksum, compute_transport_checksum, MacAddr, PacketError, ARP_PACKET_LEN,
    ETHERNET_HEADER_LEN, ETHERTYPE_IPV4, IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_LEN,
    TCP_HEADER_LEN, UDP_HEADER_LEN,
};

// =============================================================================
// Ethernet
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.dst.0);
        buf.extend_from_slice(&self.src.0);
        buf.extend_from_slice(&self.ethertype.to_be_bytes());
    }
}

// =============================================================================
// IPv4
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub protocol: u8,
    pub identification: u16,
    pub dont_fragment: bool,
}

impl Ipv4Header {
    /// Header with TTL 64, no fragmentation flags and a zero id.
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> Self {
        Self {
            src,
            dst,
            ttl: 64,
            protocol,
            identification: 0,
            dont_fragment: false,
        }
    }

    /// Write a 20-byte header for a datagram carrying `payload_len` bytes.
    pub fn write(&self, buf: &mut Vec<u8>, payload_len: usize) {
        let start = buf.len();
        let total_len = (IPV4_HEADER_LEN + payload_len) as u16;
        buf.push(0x45); // Version=4, IHL=5
        buf.push(0); // DSCP/ECN
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&self.identification.to_be_bytes());
        buf.push(if self.dont_fragment { 0x40 } else { 0 });
        buf.push(0);
        buf.push(self.ttl);
        buf.push(self.protocol);
        buf.extend_from_slice(&[0, 0]); // checksum, computed below
        buf.extend_from_slice(&self.src.octets());
        buf.extend_from_slice(&self.dst.octets());
        let csum = compute_ip_checksum(&buf[start..start + IPV4_HEADER_LEN]);
        buf[start + 10..start + 12].copy_from_slice(&csum.to_be_bytes());
    }
}

// =============================================================================
// UDP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Ethernet + IPv4 + UDP + `payload`.
pub fn udp_frame(
    eth: &EthernetHeader,
    ip: &Ipv4Header,
    udp: &UdpHeader,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let mut buf =
        Vec::with_capacity(ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + udp_len);
    eth.write(&mut buf);
    let ip = Ipv4Header {
        protocol: IPPROTO_UDP,
        ..*ip
    };
    ip.write(&mut buf, udp_len);

    let seg_start = buf.len();
    buf.extend_from_slice(&udp.src_port.to_be_bytes());
    buf.extend_from_slice(&udp.dst_port.to_be_bytes());
    buf.extend_from_slice(&(udp_len as u16).to_be_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(payload);

    let mut csum =
        compute_transport_checksum(&buf[seg_start..], IPPROTO_UDP, 6, &ip.src, &ip.dst);
    // A computed zero is transmitted as all ones (RFC 768).
    if csum == 0 {
        csum = 0xffff;
    }
    buf[seg_start + 6..seg_start + 8].copy_from_slice(&csum.to_be_bytes());
    buf
}

// =============================================================================
// TCP
// =============================================================================

/// TCP control bits as carried in byte 13 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);
    pub const ECE: TcpFlags = TcpFlags(0x40);
    pub const CWR: TcpFlags = TcpFlags(0x80);

    pub const fn empty() -> Self {
        TcpFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        TcpFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear `flag` depending on `on`.
    pub fn set(&mut self, flag: TcpFlags, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;
    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TcpFlags {
    fn bitor_assign(&mut self, rhs: TcpFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub urgent_ptr: u16,
    /// Raw option bytes; zero-padded to a 4-byte boundary on write.
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(src_port: u16, dst_port: u16, flags: TcpFlags) -> Self {
        Self {
            src_port,
            dst_port,
            seq: 0,
            ack: 0,
            flags,
            window: 64240,
            urgent_ptr: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }
}

/// Ethernet + IPv4 + TCP.
pub fn tcp_frame(eth: &EthernetHeader, ip: &Ipv4Header, seg: &TcpSegment) -> Vec<u8> {
    let options_padded = (seg.options.len() + 3) & !3;
    let header_len = TCP_HEADER_LEN + options_padded;
    let tcp_len = header_len + seg.payload.len();
    let mut buf = Vec::with_capacity(ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + tcp_len);
    eth.write(&mut buf);
    let ip = Ipv4Header {
        protocol: IPPROTO_TCP,
        ..*ip
    };
    ip.write(&mut buf, tcp_len);

    let seg_start = buf.len();
    buf.extend_from_slice(&seg.src_port.to_be_bytes());
    buf.extend_from_slice(&seg.dst_port.to_be_bytes());
    buf.extend_from_slice(&seg.seq.to_be_bytes());
    buf.extend_from_slice(&seg.ack.to_be_bytes());
    buf.push(((header_len / 4) as u8) << 4); // data offset in 32-bit words
    buf.push(seg.flags.bits());
    buf.extend_from_slice(&seg.window.to_be_bytes());
    buf.extend_from_slice(&[0, 0]); // checksum, computed below
    buf.extend_from_slice(&seg.urgent_ptr.to_be_bytes());
    buf.extend_from_slice(&seg.options);
    buf.resize(seg_start + header_len, 0);
    buf.extend_from_slice(&seg.payload);

    let csum = compute_transport_checksum(&buf[seg_start..], IPPROTO_TCP, 16, &ip.src, &ip.dst);
    buf[seg_start + 16..seg_start + 18].copy_from_slice(&csum.to_be_bytes());
    buf
}

// =============================================================================
// ARP
// =============================================================================

/// Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_hw: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_hw: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub const REQUEST: u16 = 1;
    pub const REPLY: u16 = 2;

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&1u16.to_be_bytes()); // hardware type: Ethernet
        buf.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        buf.push(6);
        buf.push(4);
        buf.extend_from_slice(&self.operation.to_be_bytes());
        buf.extend_from_slice(&self.sender_hw.0);
        buf.extend_from_slice(&self.sender_ip.octets());
        buf.extend_from_slice(&self.target_hw.0);
        buf.extend_from_slice(&self.target_ip.octets());
    }

    /// Decode an Ethernet/IPv4 ARP body.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < ARP_PACKET_LEN {
            return Err(PacketError::Truncated {
                layer: "arp",
                need: ARP_PACKET_LEN,
                have: data.len(),
            });
        }
        let mac = |off: usize| {
            let mut m = [0u8; 6];
            m.copy_from_slice(&data[off..off + 6]);
            MacAddr(m)
        };
        let ip = |off: usize| Ipv4Addr::new(data[off], data[off + 1], data[off + 2], data[off + 3]);
        Ok(Self {
            operation: u16::from_be_bytes([data[6], data[7]]),
            sender_hw: mac(8),
            sender_ip: ip(14),
            target_hw: mac(18),
            target_ip: ip(24),
        })
    }
}

/// Ethernet + ARP.
pub fn arp_frame(eth: &EthernetHeader, arp: &ArpPacket) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ETHERNET_HEADER_LEN + ARP_PACKET_LEN);
    eth.write(&mut buf);
    arp.write(&mut buf);
    buf
}

// =============================================================================
// Tests
// =============================================================================
