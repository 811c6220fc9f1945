//! TCP connection-attempt generator: SYN floods for handshake modes 1 and 2,
//! randomized unsolicited segments for mode 0.

use std::net::Ipv4Addr;
use std::path::Path;

use parking_lot::Mutex;
use rand::Rng;

use super::{
    generate_port_list, Generator, LoopExit, SendLoop, SOURCE_PORT_END, SOURCE_PORT_START,
};
use crate::config::{HandshakeMode, RunOptions, TcpConnOptions};
use crate::error::HammerError;
use crate::packet::{
    tcp_frame, EthernetHeader, Ipv4Header, MacAddr, TcpFlags, TcpSegment, ETHERTYPE_IPV4,
    IPPROTO_TCP,
};
use crate::sink::Sinks;
use crate::stats::StatKind;

/// MSS 1460, carried on every SYN.
const SYN_OPTIONS: [u8; 4] = [0x02, 0x04, 0x05, 0xb4];

/// Newline-delimited IPv4 addresses; blank and unparseable lines are skipped.
///
/// # Errors
/// The file cannot be read, or yields no address.
pub fn load_spoof_sources(path: &Path) -> Result<Vec<Ipv4Addr>, HammerError> {
    let content = std::fs::read_to_string(path).map_err(|e| HammerError::SpoofSources {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let sources: Vec<Ipv4Addr> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| match l.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::debug!(line = l, "skipping spoof source line");
                None
            }
        })
        .collect();
    if sources.is_empty() {
        return Err(HammerError::SpoofSources {
            path: path.to_path_buf(),
            reason: "no valid IPv4 address".to_string(),
        });
    }
    Ok(sources)
}

/// Flags for a handshake-opening SYN.
pub fn syn_flags(opts: &TcpConnOptions) -> TcpFlags {
    let mut flags = TcpFlags::SYN;
    flags.set(TcpFlags::URG, opts.use_urgent);
    flags.set(TcpFlags::PSH, opts.use_push);
    if opts.request_congestion_management {
        flags |= TcpFlags::ECE | TcpFlags::CWR;
    }
    flags
}

/// Map a 6-bit draw onto TCP flags. Bit 0 is SYN+ACK, bit 1 plain ACK, then
/// RST, FIN, URG, PSH.
fn permutation_flags(bits: u8) -> TcpFlags {
    let mut flags = TcpFlags::empty();
    flags.set(TcpFlags::SYN, bits & 0b00_0001 != 0);
    flags.set(TcpFlags::ACK, bits & 0b00_0011 != 0);
    flags.set(TcpFlags::RST, bits & 0b00_0100 != 0);
    flags.set(TcpFlags::FIN, bits & 0b00_1000 != 0);
    flags.set(TcpFlags::URG, bits & 0b01_0000 != 0);
    flags.set(TcpFlags::PSH, bits & 0b10_0000 != 0);
    flags
}

/// Random non-empty flag set restricted to `mask`
/// (see [`TcpConnOptions::unsolicited_mask`]). Empty only when `mask` is 0.
pub fn unsolicited_flags<R: Rng>(rng: &mut R, mask: u8) -> TcpFlags {
    let mask = mask & 0b11_1111;
    if mask == 0 {
        return TcpFlags::empty();
    }
    loop {
        let flags = permutation_flags(rng.gen_range(1..64u8) & mask);
        if !flags.is_empty() {
            return flags;
        }
    }
}

#[derive(Debug, Default)]
struct Pools {
    sources: Vec<Ipv4Addr>,
    src_ports: Vec<u16>,
    dst_ports: Vec<u16>,
}

pub struct TcpConnGenerator {
    options: TcpConnOptions,
    iface_mac: MacAddr,
    gateway_mac: MacAddr,
    sinks: Sinks,
    send_loop: SendLoop,
    pools: Mutex<Pools>,
}

impl TcpConnGenerator {
    pub fn new(
        options: TcpConnOptions,
        run: &RunOptions,
        iface_mac: MacAddr,
        gateway_mac: MacAddr,
        sinks: Sinks,
    ) -> Self {
        Self {
            options,
            iface_mac,
            gateway_mac,
            sinks,
            send_loop: SendLoop::new(run),
            pools: Mutex::new(Pools::default()),
        }
    }

    fn segment<R: Rng>(&self, rng: &mut R, src_port: u16, dst_port: u16) -> TcpSegment {
        let flags = match self.options.handshake {
            HandshakeMode::None => unsolicited_flags(rng, self.options.unsolicited_mask()),
            HandshakeMode::Syn | HandshakeMode::Full => syn_flags(&self.options),
        };
        let mut seg = TcpSegment::new(src_port, dst_port, flags);
        seg.seq = rng.gen();
        if flags.contains(TcpFlags::ACK) {
            seg.ack = rng.gen();
        }
        if flags.contains(TcpFlags::SYN) {
            seg.options = SYN_OPTIONS.to_vec();
        }
        seg
    }
}

impl Generator for TcpConnGenerator {
    fn init(&self) -> Result<(), HammerError> {
        let sources = match &self.options.spoof_sources_file {
            Some(path) => load_spoof_sources(path)?,
            None => vec![crate::gateway::detect_source_ip(self.options.target_server_ip)?],
        };
        tracing::debug!(sources = sources.len(), "TCP source addresses ready");
        *self.pools.lock() = Pools {
            sources,
            src_ports: generate_port_list(SOURCE_PORT_START, SOURCE_PORT_END),
            dst_ports: generate_port_list(
                self.options.target_port_start,
                self.options.target_port_end,
            ),
        };
        Ok(())
    }

    fn run(&self) {
        let pools = std::mem::take(&mut *self.pools.lock());
        if pools.sources.is_empty() {
            self.sinks.log("TCP generator was not initialized; not sending");
            return;
        }
        let eth = EthernetHeader {
            dst: self.gateway_mac,
            src: self.iface_mac,
            ethertype: ETHERTYPE_IPV4,
        };
        let mut rng = rand::thread_rng();
        let (mut src_idx, mut sport_idx, mut dport_idx) = (0usize, 0usize, 0usize);

        let exit = self.send_loop.run(|| {
            let src = pools.sources[src_idx];
            src_idx = (src_idx + 1) % pools.sources.len();
            let sport = pools.src_ports[sport_idx];
            sport_idx = (sport_idx + 1) % pools.src_ports.len();
            let dport = pools.dst_ports[dport_idx];
            dport_idx = (dport_idx + 1) % pools.dst_ports.len();

            let seg = self.segment(&mut rng, sport, dport);
            let ip = Ipv4Header {
                identification: rng.gen(),
                dont_fragment: true,
                ..Ipv4Header::new(src, self.options.target_server_ip, IPPROTO_TCP)
            };
            if self.sinks.send(tcp_frame(&eth, &ip, &seg)) {
                self.sinks.stat(StatKind::PacketsSent);
                self.sinks.stat(StatKind::ConnAttempt);
                if seg.flags.contains(TcpFlags::SYN) && !seg.flags.contains(TcpFlags::ACK) {
                    self.sinks.stat(StatKind::SynSent);
                }
            }
            true
        });
        if exit == LoopExit::LifetimeElapsed {
            self.sinks.log("TCP generator reached its max lifetime");
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
