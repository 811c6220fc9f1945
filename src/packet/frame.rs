//! Lazy, zero-copy view over a received Ethernet frame.
//!
//! Nothing is decoded up front. Each accessor walks only the headers it needs
//! (Ethernet, then ARP or IPv4, then UDP/TCP, then DHCP) so a handler that
//! discards a frame after checking its ethertype pays for two bytes of parsing.

use std::net::Ipv4Addr;

use super::{
    ArpPacket, DhcpMessage, EthernetHeader, MacAddr, TcpFlags, DHCP_CLIENT_PORT,
    DHCP_SERVER_PORT, ETHERNET_HEADER_LEN, ETHERTYPE_ARP, ETHERTYPE_IPV4, IPPROTO_TCP,
    IPPROTO_UDP, IPV4_HEADER_LEN, TCP_HEADER_LEN, UDP_HEADER_LEN,
};

/// An inbound frame, owned, decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ethernet(&self) -> Option<EthernetHeader> {
        let d = self.data.get(..ETHERNET_HEADER_LEN)?;
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&d[0..6]);
        src.copy_from_slice(&d[6..12]);
        Some(EthernetHeader {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([d[12], d[13]]),
        })
    }

    pub fn ethertype(&self) -> Option<u16> {
        let d = self.data.get(12..ETHERNET_HEADER_LEN)?;
        Some(u16::from_be_bytes([d[0], d[1]]))
    }

    fn l3(&self) -> &[u8] {
        self.data.get(ETHERNET_HEADER_LEN..).unwrap_or(&[])
    }

    pub fn arp(&self) -> Option<ArpPacket> {
        if self.ethertype()? != ETHERTYPE_ARP {
            return None;
        }
        ArpPacket::parse(self.l3()).ok()
    }

    pub fn ipv4(&self) -> Option<Ipv4View<'_>> {
        if self.ethertype()? != ETHERTYPE_IPV4 {
            return None;
        }
        Ipv4View::parse(self.l3())
    }

    pub fn udp(&self) -> Option<UdpView<'_>> {
        let ip = self.ipv4()?;
        if ip.protocol() != IPPROTO_UDP || ip.is_fragment() {
            return None;
        }
        UdpView::parse(ip.payload())
    }

    pub fn tcp(&self) -> Option<TcpView<'_>> {
        let ip = self.ipv4()?;
        if ip.protocol() != IPPROTO_TCP || ip.is_fragment() {
            return None;
        }
        TcpView::parse(ip.payload())
    }

    /// DHCPv4 message carried on UDP port 67 or 68, if any.
    pub fn dhcpv4(&self) -> Option<DhcpMessage> {
        let udp = self.udp()?;
        let ports = [DHCP_SERVER_PORT, DHCP_CLIENT_PORT];
        if !ports.contains(&udp.src_port()) && !ports.contains(&udp.dst_port()) {
            return None;
        }
        DhcpMessage::parse(udp.payload()).ok()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::new(data)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Layer views
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Ipv4View<'a> {
    header: &'a [u8],
    payload: &'a [u8],
}

impl<'a> Ipv4View<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let first = *data.first()?;
        if first >> 4 != 4 {
            return None;
        }
        let ihl = ((first & 0x0f) as usize) * 4;
        if ihl < IPV4_HEADER_LEN || data.len() < ihl {
            return None;
        }
        let total = u16::from_be_bytes([data[2], data[3]]) as usize;
        // Ethernet pads short frames; trust the IPv4 total length.
        let end = total.clamp(ihl, data.len());
        Some(Self {
            header: &data[..ihl],
            payload: &data[ihl..end],
        })
    }

    pub fn src(&self) -> Ipv4Addr {
        let h = self.header;
        Ipv4Addr::new(h[12], h[13], h[14], h[15])
    }

    pub fn dst(&self) -> Ipv4Addr {
        let h = self.header;
        Ipv4Addr::new(h[16], h[17], h[18], h[19])
    }

    pub fn ttl(&self) -> u8 {
        self.header[8]
    }

    pub fn protocol(&self) -> u8 {
        self.header[9]
    }

    /// True for any fragment other than a complete datagram.
    pub fn is_fragment(&self) -> bool {
        let frag = u16::from_be_bytes([self.header[6], self.header[7]]);
        frag & 0x2000 != 0 || frag & 0x1fff != 0
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UdpView<'a> {
    data: &'a [u8],
}

impl<'a> UdpView<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }
        Some(Self { data })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn payload(&self) -> &'a [u8] {
        let len = u16::from_be_bytes([self.data[4], self.data[5]]) as usize;
        let end = len.clamp(UDP_HEADER_LEN, self.data.len());
        &self.data[UDP_HEADER_LEN..end]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TcpView<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> TcpView<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }
        let header_len = ((data[12] >> 4) as usize) * 4;
        if header_len < TCP_HEADER_LEN || header_len > data.len() {
            return None;
        }
        Some(Self { data, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.data[0], self.data[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn seq(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ack(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits(self.data[13])
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes([self.data[14], self.data[15]])
    }

    pub fn options(&self) -> &'a [u8] {
        &self.data[TCP_HEADER_LEN..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..]
    }
}

// =============================================================================
// Tests
// =============================================================================
