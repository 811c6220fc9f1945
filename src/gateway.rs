//! Next-hop resolution: default gateway IP from the routing table, its MAC
//! from the neighbour table or, failing that, a live ARP exchange.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::HammerError;
use crate::packet::{arp_frame, ArpPacket, EthernetHeader, MacAddr, ETHERTYPE_ARP};
use crate::transport::{PacketLink, RawSocket};

/// How long to wait for the gateway to answer an ARP request.
pub const ARP_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve `--gateway-mac`: `auto` walks route table, ARP cache, then a live
/// ARP request; anything else must parse as a MAC.
pub fn gateway_mac_from_arg(arg: &str, interface: &str) -> Result<MacAddr, HammerError> {
    if arg.eq_ignore_ascii_case("auto") {
        return resolve_gateway_mac(interface);
    }
    arg.parse()
        .map_err(|e| HammerError::Gateway(format!("--gateway-mac '{arg}': {e}")))
}

pub fn resolve_gateway_mac(interface: &str) -> Result<MacAddr, HammerError> {
    let route = std::fs::read_to_string("/proc/net/route")
        .map_err(|e| HammerError::Gateway(format!("read /proc/net/route: {e}")))?;
    let gw_ip = parse_gateway_from_proc_route(&route, interface).ok_or_else(|| {
        HammerError::Gateway(format!("no default gateway via {interface} in /proc/net/route"))
    })?;

    let arp = std::fs::read_to_string("/proc/net/arp")
        .map_err(|e| HammerError::Gateway(format!("read /proc/net/arp: {e}")))?;
    if let Some(mac) = parse_arp_mac(&arp, gw_ip) {
        tracing::debug!(gateway = %gw_ip, %mac, "gateway MAC from ARP cache");
        return Ok(mac);
    }

    tracing::debug!(gateway = %gw_ip, "gateway not in ARP cache, sending ARP request");
    arp_resolve(interface, gw_ip, ARP_RESOLVE_TIMEOUT)
}

/// Default gateway from `/proc/net/route` content.
///
/// Takes the first default route (destination `00000000`, flags
/// RTF_UP|RTF_GATEWAY) on `interface`, falling back to the first default
/// route on any interface. The gateway column is little-endian hex.
pub fn parse_gateway_from_proc_route(content: &str, interface: &str) -> Option<Ipv4Addr> {
    let mut fallback = None;
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[1] != "00000000" {
            continue;
        }
        let flags = u32::from_str_radix(fields[3], 16).unwrap_or(0);
        if flags & 0x3 != 0x3 {
            continue;
        }
        let Ok(gw) = u32::from_str_radix(fields[2], 16) else {
            continue;
        };
        let ip = Ipv4Addr::from(gw.to_le_bytes());
        if fields[0] == interface {
            return Some(ip);
        }
        fallback.get_or_insert(ip);
    }
    fallback
}

/// MAC of `ip` in `/proc/net/arp` content, skipping incomplete entries.
pub fn parse_arp_mac(content: &str, ip: Ipv4Addr) -> Option<MacAddr> {
    let ip = ip.to_string();
    content
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|f| f.len() >= 4 && f[0] == ip)
        .filter_map(|f| f[3].parse::<MacAddr>().ok())
        .find(|mac| *mac != MacAddr::ZERO)
}

/// Source address the kernel would use toward `target` (UDP connect; nothing
/// is sent).
pub fn detect_source_ip(target: Ipv4Addr) -> Result<Ipv4Addr, HammerError> {
    let err = |e: std::io::Error| HammerError::SourceAddress(format!("toward {target}: {e}"));
    let sock = UdpSocket::bind("0.0.0.0:0").map_err(err)?;
    sock.connect((target, 80)).map_err(err)?;
    match sock.local_addr().map_err(err)?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(HammerError::SourceAddress(format!(
            "expected an IPv4 source toward {target}, got {ip}"
        ))),
    }
}

/// Broadcast one ARP request for `target` and wait for its reply.
fn arp_resolve(interface: &str, target: Ipv4Addr, timeout: Duration) -> Result<MacAddr, HammerError> {
    let sock = RawSocket::open(interface, None, false)?;
    let result = arp_exchange(&sock, target, timeout);
    sock.close()?;
    result
}

pub(crate) fn arp_exchange(
    link: &dyn PacketLink,
    target: Ipv4Addr,
    timeout: Duration,
) -> Result<MacAddr, HammerError> {
    let mac = link.interface().mac;
    let request = ArpPacket {
        operation: ArpPacket::REQUEST,
        sender_hw: mac,
        sender_ip: detect_source_ip(target)?,
        target_hw: MacAddr::ZERO,
        target_ip: target,
    };
    let eth = EthernetHeader {
        dst: MacAddr::BROADCAST,
        src: mac,
        ethertype: ETHERTYPE_ARP,
    };
    link.send_frame(&arp_frame(&eth, &request))?;

    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        let Some(rx) = link.poll_frame(left.as_millis().max(1) as u64)? else {
            continue;
        };
        if rx.outgoing {
            continue;
        }
        let frame = crate::packet::Frame::new(rx.data);
        if let Some(reply) = frame.arp() {
            if reply.operation == ArpPacket::REPLY && reply.sender_ip == target {
                return Ok(reply.sender_hw);
            }
        }
    }
    Err(HammerError::Gateway(format!(
        "no ARP reply from {target} within {}s",
        timeout.as_secs()
    )))
}
