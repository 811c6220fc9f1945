//! Rate-governed probe generators.
//!
//! A generator owns no socket. It builds frames and pushes them through the
//! payload sink inside a [`SendLoop`], which applies the requests-per-second
//! ceiling, live rate updates and the optional max lifetime.

pub mod dhcpv4;
pub mod tcpconn;

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::RunOptions;
use crate::error::HammerError;
use crate::packet::MacAddr;
use crate::shutdown::StopSignal;

pub use dhcpv4::DhcpV4Generator;
pub use tcpconn::TcpConnGenerator;

/// Source ports used by the TCP generator: `[SOURCE_PORT_START, SOURCE_PORT_END)`.
pub const SOURCE_PORT_START: u16 = 10000;
pub const SOURCE_PORT_END: u16 = 60000;

pub trait Generator: Send + Sync {
    /// One-time preparation (pools, port lists, source addresses).
    fn init(&self) -> Result<(), HammerError>;

    /// Send loop; returns on stop or when the lifetime elapses.
    fn run(&self);

    /// Request exit and block until the loop has returned.
    fn stop(&self);

    /// Apply a live update. Needs a numeric `rps` field.
    fn update(&self, update: &serde_json::Value) -> Result<(), HammerError>;

    fn deinit(&self) -> Result<(), HammerError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate governor
// ─────────────────────────────────────────────────────────────────────────────

/// Sends-per-second ceiling over a window that restarts on every rate change.
///
/// The instantaneous rate is `sent / elapsed`, truncated to an integer; the
/// governor throttles while it is at or above the ceiling. A ceiling of 0
/// never throttles.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    max_rate: u64,
    sent: u64,
    window_start: Instant,
}

impl RateGovernor {
    pub fn new(max_rate: u64, now: Instant) -> Self {
        Self {
            max_rate,
            sent: 0,
            window_start: now,
        }
    }

    pub fn max_rate(&self) -> u64 {
        self.max_rate
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn should_throttle(&self, now: Instant) -> bool {
        if self.max_rate == 0 || self.sent == 0 {
            return false;
        }
        let elapsed_ns = now.saturating_duration_since(self.window_start).as_nanos();
        // floor(sent / elapsed) >= max  <=>  sent >= max * elapsed
        (self.sent as u128) * 1_000_000_000 >= (self.max_rate as u128) * elapsed_ns
    }

    pub fn record_send(&mut self) {
        self.sent += 1;
    }

    /// New ceiling; the window restarts at `now` with nothing sent.
    pub fn reset(&mut self, max_rate: u64, now: Instant) {
        self.max_rate = max_rate;
        self.sent = 0;
        self.window_start = now;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Send loop
// ─────────────────────────────────────────────────────────────────────────────

/// Why a [`SendLoop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    LifetimeElapsed,
}

/// Stop handshake, rate-update channel and lifetime shared by both
/// generators.
pub struct SendLoop {
    signal: StopSignal,
    rate_tx: Sender<u64>,
    rate_rx: Receiver<u64>,
    initial_rps: u64,
    max_lifetime: Duration,
}

impl SendLoop {
    pub fn new(run: &RunOptions) -> Self {
        let (rate_tx, rate_rx) = bounded(1);
        Self {
            signal: StopSignal::new(),
            rate_tx,
            rate_rx,
            initial_rps: run.rps,
            max_lifetime: run.max_lifetime,
        }
    }

    /// Drive `step` until stopped or out of lifetime.
    ///
    /// The lifetime runs from loop start; rate updates restart the rate
    /// window but not the lifetime.
    ///
    /// `step` builds and sends one frame and returns whether it produced one;
    /// only those iterations count against the rate.
    pub fn run(&self, mut step: impl FnMut() -> bool) -> LoopExit {
        let Some(_done) = self.signal.start() else {
            return LoopExit::Stopped;
        };
        let started = Instant::now();
        let mut governor = RateGovernor::new(self.initial_rps, started);

        loop {
            if self.signal.finish_requested() {
                return LoopExit::Stopped;
            }
            if !self.max_lifetime.is_zero() && started.elapsed() >= self.max_lifetime {
                return LoopExit::LifetimeElapsed;
            }
            if let Ok(rps) = self.rate_rx.try_recv() {
                tracing::info!(rps, "rate updated");
                governor.reset(rps, Instant::now());
            }
            if governor.should_throttle(Instant::now()) {
                std::thread::yield_now();
                continue;
            }
            if step() {
                governor.record_send();
            }
        }
    }

    pub fn stop(&self) {
        self.signal.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.signal.is_done()
    }

    /// Parse `{"rps": N}` and hand the new rate to the loop. A pending,
    /// not yet applied rate is replaced.
    pub fn update(&self, update: &serde_json::Value) -> Result<(), HammerError> {
        let rps = parse_rps(update)?;
        if self.is_finished() {
            return Err(HammerError::NotRunning);
        }
        while self.rate_rx.try_recv().is_ok() {}
        self.rate_tx
            .try_send(rps)
            .map_err(|_| HammerError::NotRunning)
    }
}

fn parse_rps(update: &serde_json::Value) -> Result<u64, HammerError> {
    let value = update
        .get("rps")
        .ok_or_else(|| HammerError::InvalidUpdate("missing 'rps' field".to_string()))?;
    if let Some(rps) = value.as_u64() {
        return Ok(rps);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 => Ok(f as u64),
        _ => Err(HammerError::InvalidUpdate(format!(
            "'rps' must be a non-negative number, got {value}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pools
// ─────────────────────────────────────────────────────────────────────────────

/// Client hardware addresses: `count - specified.len()` random unicast MACs
/// followed by `specified` verbatim. A `seed` of 0 seeds from the clock.
pub fn generate_mac_pool(count: usize, specified: &[MacAddr], seed: u64) -> Vec<MacAddr> {
    let seed = if seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        seed
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let random = count.saturating_sub(specified.len());

    let mut pool = Vec::with_capacity(random + specified.len());
    for _ in 0..random {
        let mut octets = [0u8; 6];
        rng.fill(&mut octets);
        octets[0] &= !0x01; // unicast
        pool.push(MacAddr(octets));
    }
    pool.extend_from_slice(specified);
    pool
}

/// `[start]` when `end` is 0 (or not above `start`), otherwise every port in
/// `[start, end)` in random order.
pub fn generate_port_list(start: u16, end: u16) -> Vec<u16> {
    if end <= start {
        return vec![start];
    }
    let mut ports: Vec<u16> = (start..end).collect();
    ports.shuffle(&mut rand::thread_rng());
    ports
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_mac_pool_size_and_order() {
        let specified = vec![
            MacAddr([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
            MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
        ];
        let pool = generate_mac_pool(5, &specified, 42);
        assert_eq!(pool.len(), 5);
        for mac in &pool[..3] {
            assert_eq!(mac.0[0] & 0x01, 0, "generated MAC {mac} must be unicast");
        }
        assert_eq!(&pool[3..], &specified[..], "specified MACs appear verbatim, last");
    }

    #[test]
    fn test_mac_pool_seed_is_deterministic() {
        assert_eq!(generate_mac_pool(4, &[], 7), generate_mac_pool(4, &[], 7));
        assert_ne!(generate_mac_pool(4, &[], 7), generate_mac_pool(4, &[], 8));
    }

    #[test]
    fn test_mac_pool_specified_exceeding_count() {
        let specified = vec![MacAddr([2, 0, 0, 0, 0, 1]), MacAddr([2, 0, 0, 0, 0, 2])];
        assert_eq!(generate_mac_pool(1, &specified, 1), specified);
    }

    #[test]
    fn test_port_list_single() {
        assert_eq!(generate_port_list(8080, 0), vec![8080]);
    }

    #[test]
    fn test_port_list_range() {
        let ports = generate_port_list(1000, 1100);
        assert_eq!(ports.len(), 100);
        assert!(ports.iter().all(|p| (1000..1100).contains(p)));
        let unique: HashSet<_> = ports.iter().collect();
        assert_eq!(unique.len(), 100, "range is a permutation");
    }

    #[test]
    fn test_governor_unlimited_never_throttles() {
        let t0 = Instant::now();
        let mut g = RateGovernor::new(0, t0);
        for _ in 0..1000 {
            g.record_send();
        }
        assert!(!g.should_throttle(t0));
    }

    /// Simulated clock at 1 ms resolution: every 1 s window holds at most
    /// `rate` sends.
    #[test]
    fn test_governor_rolling_window_bound() {
        for rate in [1u64, 10, 50, 333] {
            let t0 = Instant::now();
            let mut g = RateGovernor::new(rate, t0);
            let mut sends = Vec::new();
            for ms in 0..5_000u64 {
                let now = t0 + Duration::from_millis(ms);
                if !g.should_throttle(now) {
                    g.record_send();
                    sends.push(ms);
                }
            }
            assert!(sends.len() as u64 >= rate * 4, "rate {rate}: governor too strict");
            for (i, &start) in sends.iter().enumerate() {
                let in_window = sends[i..].iter().take_while(|&&t| t < start + 1000).count();
                assert!(
                    in_window as u64 <= rate,
                    "rate {rate}: {in_window} sends in window starting at {start} ms"
                );
            }
        }
    }

    #[test]
    fn test_governor_reset_restarts_window() {
        let t0 = Instant::now();
        let mut g = RateGovernor::new(1, t0);
        g.record_send();
        assert!(g.should_throttle(t0 + Duration::from_millis(500)));
        g.reset(100, t0 + Duration::from_millis(500));
        assert_eq!(g.sent(), 0);
        assert_eq!(g.max_rate(), 100);
        assert!(!g.should_throttle(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_send_loop_lifetime() {
        let sl = SendLoop::new(&RunOptions {
            rps: 10,
            max_lifetime: Duration::from_millis(300),
            ..Default::default()
        });
        let mut count = 0;
        let exit = sl.run(|| {
            count += 1;
            true
        });
        assert_eq!(exit, LoopExit::LifetimeElapsed);
        assert!(count <= 4, "10 rps for 300 ms sends at most 4 frames, got {count}");
        assert!(sl.is_finished());
    }

    #[test]
    fn test_lifetime_not_reset_by_rate_update() {
        let sl = Arc::new(SendLoop::new(&RunOptions {
            rps: 0,
            max_lifetime: Duration::from_millis(300),
            ..Default::default()
        }));
        let runner = Arc::clone(&sl);
        let start = Instant::now();
        let handle = std::thread::spawn(move || runner.run(|| true));
        std::thread::sleep(Duration::from_millis(200));
        sl.update(&serde_json::json!({"rps": 1000})).unwrap();
        assert_eq!(handle.join().unwrap(), LoopExit::LifetimeElapsed);
        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(450),
            "lifetime restarted by the update: ran {elapsed:?}"
        );
    }

    #[test]
    fn test_send_loop_stop_and_update() {
        let sl = Arc::new(SendLoop::new(&RunOptions {
            rps: 1,
            ..Default::default()
        }));
        let runner = Arc::clone(&sl);
        let handle = std::thread::spawn(move || runner.run(|| true));
        sl.update(&serde_json::json!({"rps": 500})).unwrap();
        sl.stop();
        assert_eq!(handle.join().unwrap(), LoopExit::Stopped);
        assert!(matches!(
            sl.update(&serde_json::json!({"rps": 5})),
            Err(HammerError::NotRunning)
        ));
    }

    #[test]
    fn test_update_validation() {
        let sl = SendLoop::new(&RunOptions::default());
        assert!(matches!(
            sl.update(&serde_json::json!({})),
            Err(HammerError::InvalidUpdate(_))
        ));
        assert!(matches!(
            sl.update(&serde_json::json!({"rps": "fast"})),
            Err(HammerError::InvalidUpdate(_))
        ));
        assert!(matches!(
            sl.update(&serde_json::json!({"rps": -1})),
            Err(HammerError::InvalidUpdate(_))
        ));
        sl.update(&serde_json::json!({"rps": 12})).unwrap();
        sl.update(&serde_json::json!({"rps": 2.5})).unwrap();
        assert_eq!(sl.rate_rx.try_recv().ok(), Some(2), "latest update wins");
    }
}
