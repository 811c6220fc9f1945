//! DHCPv4 message model (RFC 2131 fixed header + RFC 2132 options).

use std::net::Ipv4Addr;

use base64::Engine as _;

use super::{MacAddr, PacketError};

/// BOOTP fixed header length, up to and including the magic cookie.
pub const DHCP_HEADER_LEN: usize = 240;
/// Encoded messages are padded to the BOOTP minimum.
pub const BOOTP_MIN_LEN: usize = 300;
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const FLAG_BROADCAST: u16 = 0x8000;

pub const OPT_PAD: u8 = 0;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
pub const OPT_END: u8 = 255;

/// Subnet mask, NTP servers, router, domain name, DNS.
pub const DEFAULT_PARAMETER_REQUEST_LIST: [u8; 5] = [0x01, 0x28, 0x03, 0x0f, 0x06];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    /// Parse a `<decimal code 1-254>:<base64 payload>` command-line entry.
    /// PAD (0) and END (255) carry no length byte and are rejected.
    pub fn parse_encoded(entry: &str) -> Result<Self, PacketError> {
        let invalid = |reason: String| PacketError::InvalidOption {
            entry: entry.to_string(),
            reason,
        };
        let (code, payload) = entry
            .split_once(':')
            .ok_or_else(|| invalid("expected <code>:<base64>".to_string()))?;
        let code: u32 = code
            .trim()
            .parse()
            .map_err(|e| invalid(format!("option code: {e}")))?;
        let code = match u8::try_from(code) {
            Ok(c) if c != OPT_PAD && c != OPT_END => c,
            _ => {
                return Err(PacketError::UnsupportedOptionCode {
                    entry: entry.to_string(),
                    code,
                })
            }
        };
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| invalid(format!("base64 payload: {e}")))?;
        if data.len() > 255 {
            return Err(PacketError::OptionTooLong {
                code,
                len: data.len(),
            });
        }
        Ok(Self { code, data })
    }
}

/// One BOOTP/DHCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    /// Options in wire order, without PAD and END.
    pub options: Vec<DhcpOption>,
}

impl DhcpMessage {
    /// A client request with Ethernet hardware addressing and no options.
    pub fn request(xid: u32, chaddr: MacAddr) -> Self {
        Self {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: Vec::new(),
        }
    }

    pub fn set_broadcast(&mut self, on: bool) {
        if on {
            self.flags |= FLAG_BROADCAST;
        } else {
            self.flags &= !FLAG_BROADCAST;
        }
    }

    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.data.as_slice())
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.option(OPT_MESSAGE_TYPE)
            .and_then(|d| d.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        match self.option(OPT_SERVER_ID) {
            Some([a, b, c, d, ..]) => Some(Ipv4Addr::new(*a, *b, *c, *d)),
            _ => None,
        }
    }

    pub fn push_option(&mut self, option: DhcpOption) {
        self.options.push(option);
    }

    /// Serialize, appending END and padding to [`BOOTP_MIN_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = Vec::with_capacity(BOOTP_MIN_LEN);
        buf.push(self.op);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(self.hops);
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&self.secs.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr.0);
        buf.resize(28 + 16, 0); // chaddr is a 16-byte field
        buf.resize(DHCP_HEADER_LEN - 4, 0); // sname + file
        buf.extend_from_slice(&MAGIC_COOKIE);

        for opt in &self.options {
            let len = u8::try_from(opt.data.len()).map_err(|_| PacketError::OptionTooLong {
                code: opt.code,
                len: opt.data.len(),
            })?;
            buf.push(opt.code);
            buf.push(len);
            buf.extend_from_slice(&opt.data);
        }
        buf.push(OPT_END);
        if buf.len() < BOOTP_MIN_LEN {
            buf.resize(BOOTP_MIN_LEN, OPT_PAD);
        }
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < DHCP_HEADER_LEN {
            return Err(PacketError::Truncated {
                layer: "dhcpv4",
                need: DHCP_HEADER_LEN,
                have: data.len(),
            });
        }
        if data[236..240] != MAGIC_COOKIE {
            return Err(PacketError::MissingCookie);
        }
        let ip = |off: usize| Ipv4Addr::new(data[off], data[off + 1], data[off + 2], data[off + 3]);
        let mut chaddr = [0u8; 6];
        chaddr.copy_from_slice(&data[28..34]);

        let mut options = Vec::new();
        let mut i = DHCP_HEADER_LEN;
        while i < data.len() {
            let code = data[i];
            match code {
                OPT_PAD => {
                    i += 1;
                    continue;
                }
                OPT_END => break,
                _ => {}
            }
            let len = *data.get(i + 1).ok_or(PacketError::Truncated {
                layer: "dhcpv4 option",
                need: i + 2,
                have: data.len(),
            })? as usize;
            let body = data.get(i + 2..i + 2 + len).ok_or(PacketError::Truncated {
                layer: "dhcpv4 option",
                need: i + 2 + len,
                have: data.len(),
            })?;
            options.push(DhcpOption::new(code, body));
            i += 2 + len;
        }

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ip(12),
            yiaddr: ip(16),
            siaddr: ip(20),
            giaddr: ip(24),
            chaddr: MacAddr(chaddr),
            options,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn discover() -> DhcpMessage {
        let mut m = DhcpMessage::request(0x1234_5678, MacAddr([0x02, 0xaa, 0, 0, 0, 1]));
        m.set_broadcast(true);
        m.push_option(DhcpOption::new(OPT_MESSAGE_TYPE, [DhcpMessageType::Discover as u8]));
        m.push_option(DhcpOption::new(
            OPT_PARAMETER_REQUEST_LIST,
            DEFAULT_PARAMETER_REQUEST_LIST,
        ));
        m
    }

    #[test]
    fn test_encode_layout() {
        let buf = discover().encode().unwrap();
        assert_eq!(buf.len(), BOOTP_MIN_LEN, "short messages pad to 300 bytes");
        assert_eq!(buf[0], BOOTREQUEST);
        assert_eq!(buf[1], 1);
        assert_eq!(buf[2], 6);
        assert_eq!(&buf[4..8], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&buf[10..12], &[0x80, 0x00], "broadcast flag");
        assert_eq!(&buf[28..34], &[0x02, 0xaa, 0, 0, 0, 1]);
        assert_eq!(&buf[236..240], &MAGIC_COOKIE);
        assert_eq!(&buf[240..243], &[53, 1, 1]);
        assert_eq!(&buf[243..250], &[55, 5, 0x01, 0x28, 0x03, 0x0f, 0x06]);
        assert_eq!(buf[250], OPT_END);
    }

    #[test]
    fn test_parse_reads_back_options() {
        let original = discover();
        let parsed = DhcpMessage::parse(&original.encode().unwrap()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.message_type(), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn test_parse_rejects_missing_cookie() {
        let mut buf = discover().encode().unwrap();
        buf[236] = 0;
        assert!(matches!(
            DhcpMessage::parse(&buf),
            Err(PacketError::MissingCookie)
        ));
    }

    #[test]
    fn test_parse_rejects_truncated_option() {
        let mut buf = discover().encode().unwrap();
        buf.truncate(240);
        buf.extend_from_slice(&[OPT_SERVER_ID, 4, 10]);
        assert!(DhcpMessage::parse(&buf).is_err());
    }

    #[test]
    fn test_server_identifier() {
        let mut m = discover();
        assert_eq!(m.server_identifier(), None);
        m.push_option(DhcpOption::new(OPT_SERVER_ID, [10, 0, 0, 1]));
        assert_eq!(m.server_identifier(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_parse_encoded_option() {
        // "aGVsbG8=" is base64 for "hello"
        let opt = DhcpOption::parse_encoded("60:aGVsbG8=").unwrap();
        assert_eq!(opt.code, 60);
        assert_eq!(opt.data, b"hello");
    }

    #[test]
    fn test_parse_encoded_option_errors() {
        assert!(DhcpOption::parse_encoded("60").is_err(), "missing separator");
        assert!(DhcpOption::parse_encoded("abc:aGVsbG8=").is_err(), "non-numeric code");
        assert!(matches!(
            DhcpOption::parse_encoded("256:aGVsbG8="),
            Err(PacketError::UnsupportedOptionCode { code: 256, .. })
        ));
        assert!(DhcpOption::parse_encoded("60:***").is_err(), "bad base64");
        assert!(matches!(
            DhcpOption::parse_encoded("0:aGVsbG8="),
            Err(PacketError::UnsupportedOptionCode { code: 0, .. })
        ));
        assert!(matches!(
            DhcpOption::parse_encoded("255:aGVsbG8="),
            Err(PacketError::UnsupportedOptionCode { code: 255, .. })
        ));
        assert!(DhcpOption::parse_encoded("254:aGVsbG8=").is_ok());
    }
}
