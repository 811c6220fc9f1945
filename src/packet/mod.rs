//! Wire-format codec for the frames the hammers emit and inspect.
//!
//! Everything here works on plain byte buffers: builders write complete
//! Ethernet frames with lengths and checksums filled in, and [`Frame`] decodes
//! received frames lazily, one layer at a time.

pub mod build;
pub mod dhcp;
pub mod frame;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub use build::{
    arp_frame, tcp_frame, udp_frame, ArpPacket, EthernetHeader, Ipv4Header, TcpFlags, TcpSegment,
    UdpHeader,
};
pub use dhcp::{DhcpMessage, DhcpMessageType, DhcpOption};
pub use frame::Frame;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const TCP_HEADER_LEN: usize = 20;
pub const ARP_PACKET_LEN: usize = 28;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("{layer} truncated: need {need} bytes, have {have}")]
    Truncated {
        layer: &'static str,
        need: usize,
        have: usize,
    },

    #[error("invalid MAC address: '{0}'")]
    InvalidMac(String),

    #[error("DHCP magic cookie missing")]
    MissingCookie,

    #[error("DHCP option {code} payload too long ({len} bytes)")]
    OptionTooLong { code: u8, len: usize },

    #[error("DHCP option code {code} not supported (entry '{entry}')")]
    UnsupportedOptionCode { entry: String, code: u32 },

    #[error("invalid DHCP option '{entry}': {reason}")]
    InvalidOption { entry: String, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Hardware address
// ─────────────────────────────────────────────────────────────────────────────

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True when the group bit (bit 0 of the first octet) is set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = PacketError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let sep = if s.contains('-') { '-' } else { ':' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(PacketError::InvalidMac(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            if p.len() != 2 {
                return Err(PacketError::InvalidMac(s.to_string()));
            }
            mac[i] =
                u8::from_str_radix(p, 16).map_err(|_| PacketError::InvalidMac(s.to_string()))?;
        }
        Ok(MacAddr(mac))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checksums
// ─────────────────────────────────────────────────────────────────────────────

/// Running 32-bit sum of big-endian 16-bit words, before folding.
fn word_sum(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for c in &mut chunks {
        sum += u16::from_be_bytes([c[0], c[1]]) as u32;
    }
    // Odd trailing byte, padded with zero
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// RFC 1071 internet checksum over `data`.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    fold(word_sum(data, 0))
}

/// IPv4 header checksum. The checksum field (bytes 10–11) is treated as zero.
pub fn compute_ip_checksum(header: &[u8]) -> u16 {
    if header.len() < 12 {
        return ones_complement_sum(header);
    }
    let sum = word_sum(&header[..10], 0);
    fold(word_sum(&header[12..], sum))
}

/// TCP or UDP checksum including the IPv4 pseudo-header.
///
/// `checksum_offset` is the position of the checksum field inside `segment`
/// (16 for TCP, 6 for UDP); it is treated as zero.
pub fn compute_transport_checksum(
    segment: &[u8],
    protocol: u8,
    checksum_offset: usize,
    src_ip: &Ipv4Addr,
    dst_ip: &Ipv4Addr,
) -> u16 {
    let len = segment.len() as u32;
    let mut sum = word_sum(&src_ip.octets(), 0);
    sum = word_sum(&dst_ip.octets(), sum);
    sum += protocol as u32;
    sum += len;
    if segment.len() >= checksum_offset + 2 {
        sum = word_sum(&segment[..checksum_offset], sum);
        sum = word_sum(&segment[checksum_offset + 2..], sum);
    } else {
        sum = word_sum(segment, sum);
    }
    fold(sum)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_colon_and_dash() {
        let a: MacAddr = "02:1A:2b:3c:4d:5e".parse().unwrap();
        let b: MacAddr = "02-1a-2b-3c-4d-5e".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "02:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_mac_parse_rejects_garbage() {
        assert!("02:1a:2b:3c:4d".parse::<MacAddr>().is_err());
        assert!("zz:1a:2b:3c:4d:5e".parse::<MacAddr>().is_err());
        assert!("021:a:2b:3c:4d:5e".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_multicast_bit() {
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(!MacAddr([0x02, 0, 0, 0, 0, 1]).is_multicast());
        assert!(MacAddr([0x01, 0, 0x5e, 0, 0, 1]).is_multicast());
    }

    #[test]
    fn test_ip_checksum_known_vector() {
        // Classic example header from RFC 1071 discussions (checksum 0xb861).
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(compute_ip_checksum(&header), 0xb861);
    }

    #[test]
    fn test_checksum_verifies_to_zero() {
        let mut header = [
            0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xac, 0x10,
            0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ];
        let c = compute_ip_checksum(&header);
        header[10..12].copy_from_slice(&c.to_be_bytes());
        assert_eq!(
            ones_complement_sum(&header),
            0,
            "a header carrying its own checksum must sum to 0xffff (complement 0)"
        );
    }

    #[test]
    fn test_odd_length_sum() {
        // 0x0102 + 0x0300 = 0x0402 → !0x0402
        assert_eq!(ones_complement_sum(&[1, 2, 3]), !0x0402);
    }
}
