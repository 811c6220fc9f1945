//! Live counters.
//!
//! Generators and handlers push [`StatKind`] events through a bounded,
//! non-blocking channel; one aggregator thread applies them and recomputes
//! per-second rates on a fixed tick. The table sits behind a mutex only so
//! the HTTP API can read a snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HammerError;
use crate::shutdown::StopSignal;

/// Stats channel capacity; increments beyond it are dropped.
pub const STATS_CHANNEL_CAPACITY: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Counter names
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    // DHCPv4
    DiscoverSent,
    InfoSent,
    RequestSent,
    DeclineSent,
    ReleaseSent,
    OfferReceived,
    AckReceived,
    NakReceived,
    ArpReplySent,
    ArpRequestReceived,
    // TCP
    PacketsSent,
    SynSent,
    ConnAttempt,
    SynAckReceived,
    AckSent,
    ConnEstablished,
    RstReceived,
    FinReceived,
}

pub const DHCPV4_STATS: &[StatKind] = &[
    StatKind::DiscoverSent,
    StatKind::InfoSent,
    StatKind::RequestSent,
    StatKind::DeclineSent,
    StatKind::ReleaseSent,
    StatKind::OfferReceived,
    StatKind::AckReceived,
    StatKind::NakReceived,
    StatKind::ArpReplySent,
    StatKind::ArpRequestReceived,
];

pub const TCPCONN_STATS: &[StatKind] = &[
    StatKind::PacketsSent,
    StatKind::SynSent,
    StatKind::ConnAttempt,
    StatKind::SynAckReceived,
    StatKind::AckSent,
    StatKind::ConnEstablished,
    StatKind::RstReceived,
    StatKind::FinReceived,
];

impl StatKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiscoverSent => "DiscoverSent",
            Self::InfoSent => "InfoSent",
            Self::RequestSent => "RequestSent",
            Self::DeclineSent => "DeclineSent",
            Self::ReleaseSent => "ReleaseSent",
            Self::OfferReceived => "OfferReceived",
            Self::AckReceived => "AckReceived",
            Self::NakReceived => "NakReceived",
            Self::ArpReplySent => "ArpReplySent",
            Self::ArpRequestReceived => "ArpRequestReceived",
            Self::PacketsSent => "PacketsSent",
            Self::SynSent => "SynSent",
            Self::ConnAttempt => "ConnAttempt",
            Self::SynAckReceived => "SynAckReceived",
            Self::AckSent => "AckSent",
            Self::ConnEstablished => "ConnEstablished",
            Self::RstReceived => "RstReceived",
            Self::FinReceived => "FinReceived",
        }
    }
}

impl std::fmt::Display for StatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatValue {
    pub stat_name: String,
    pub stat_value: u64,
    pub stat_previous_ticker_value: u64,
    pub stat_rate_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub run_id: Uuid,
    pub hammer_type: String,
    pub timestamp: DateTime<Utc>,
    pub stats: Vec<StatValue>,
}

impl StatsSnapshot {
    pub fn value(&self, kind: StatKind) -> Option<u64> {
        self.stats
            .iter()
            .find(|s| s.stat_name == kind.name())
            .map(|s| s.stat_value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats trait
// ─────────────────────────────────────────────────────────────────────────────

pub trait Stats: Send + Sync {
    fn init(&self) -> Result<(), HammerError> {
        Ok(())
    }

    /// Queue one increment. `false` if the queue is full or closed.
    fn add_stat(&self, kind: StatKind) -> bool;

    /// Aggregator loop; returns after [`stop`](Stats::stop).
    fn run(&self);

    fn stop(&self);

    fn deinit(&self) -> Result<(), HammerError> {
        Ok(())
    }

    fn snapshot(&self) -> StatsSnapshot;
}

#[derive(Debug, Clone)]
struct Counter {
    kind: StatKind,
    value: u64,
    previous: u64,
    rate_per_second: f64,
}

/// Table of counters for one hammer type.
pub struct CounterStats {
    hammer_type: &'static str,
    run_id: Uuid,
    interval: Duration,
    table: Mutex<Vec<Counter>>,
    tx: RwLock<Option<Sender<StatKind>>>,
    rx: Receiver<StatKind>,
    signal: StopSignal,
}

impl CounterStats {
    pub fn new(
        hammer_type: &'static str,
        kinds: &[StatKind],
        interval: Duration,
        run_id: Uuid,
    ) -> Self {
        let (tx, rx) = bounded(STATS_CHANNEL_CAPACITY);
        let table = kinds
            .iter()
            .map(|&kind| Counter {
                kind,
                value: 0,
                previous: 0,
                rate_per_second: 0.0,
            })
            .collect();
        Self {
            hammer_type,
            run_id,
            interval: if interval.is_zero() {
                Duration::from_secs(crate::config::DEFAULT_STATS_INTERVAL_SECS)
            } else {
                interval
            },
            table: Mutex::new(table),
            tx: RwLock::new(Some(tx)),
            rx,
            signal: StopSignal::new(),
        }
    }

    fn increment(&self, kind: StatKind) {
        let mut table = self.table.lock();
        // Counters from another protocol are ignored.
        if let Some(c) = table.iter_mut().find(|c| c.kind == kind) {
            c.value += 1;
        }
    }

    fn tick(&self) {
        let secs = self.interval.as_secs_f64();
        let mut table = self.table.lock();
        for c in table.iter_mut() {
            c.rate_per_second = (c.value - c.previous) as f64 / secs;
            c.previous = c.value;
        }
        tracing::debug!(
            hammer = self.hammer_type,
            counters = ?table.iter().map(|c| (c.kind.name(), c.value)).collect::<Vec<_>>(),
            "stats tick"
        );
    }
}

impl Stats for CounterStats {
    fn add_stat(&self, kind: StatKind) -> bool {
        match self.tx.read().as_ref() {
            Some(tx) => tx.try_send(kind).is_ok(),
            None => false,
        }
    }

    fn run(&self) {
        let Some(_done) = self.signal.start() else {
            return;
        };
        let ticker = tick(self.interval);
        loop {
            select! {
                recv(self.rx) -> stat => match stat {
                    Ok(kind) => self.increment(kind),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.tick(),
            }
        }
    }

    fn stop(&self) {
        drop(self.tx.write().take());
        self.signal.wait();
    }

    fn snapshot(&self) -> StatsSnapshot {
        let table = self.table.lock();
        StatsSnapshot {
            run_id: self.run_id,
            hammer_type: self.hammer_type.to_string(),
            timestamp: Utc::now(),
            stats: table
                .iter()
                .map(|c| StatValue {
                    stat_name: c.kind.name().to_string(),
                    stat_value: c.value,
                    stat_previous_ticker_value: c.previous,
                    stat_rate_per_second: c.rate_per_second,
                })
                .collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn stats(interval: Duration) -> Arc<CounterStats> {
        Arc::new(CounterStats::new(
            crate::DHCPV4,
            DHCPV4_STATS,
            interval,
            Uuid::new_v4(),
        ))
    }

    #[test]
    fn test_counts_are_applied_by_the_aggregator() {
        let s = stats(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(s.add_stat(StatKind::DiscoverSent));
        }
        assert!(s.add_stat(StatKind::OfferReceived));
        // Foreign counter: accepted on the channel, ignored by the table.
        assert!(s.add_stat(StatKind::SynSent));

        let runner = Arc::clone(&s);
        let handle = std::thread::spawn(move || runner.run());
        s.stop();
        handle.join().unwrap();

        let snap = s.snapshot();
        assert_eq!(snap.value(StatKind::DiscoverSent), Some(3));
        assert_eq!(snap.value(StatKind::OfferReceived), Some(1));
        assert_eq!(snap.value(StatKind::SynSent), None);
        assert_eq!(snap.stats.len(), DHCPV4_STATS.len());
        assert!(!s.add_stat(StatKind::DiscoverSent), "stopped stats reject increments");
    }

    #[test]
    fn test_tick_computes_rate_and_previous() {
        let s = stats(Duration::from_secs(2));
        for _ in 0..10 {
            s.increment(StatKind::RequestSent);
        }
        s.tick();
        let snap = s.snapshot();
        let req = snap
            .stats
            .iter()
            .find(|v| v.stat_name == "RequestSent")
            .unwrap();
        assert_eq!(req.stat_value, 10);
        assert_eq!(req.stat_previous_ticker_value, 10);
        assert!((req.stat_rate_per_second - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_channel_drops_increment() {
        let s = stats(Duration::from_secs(60));
        for _ in 0..STATS_CHANNEL_CAPACITY {
            assert!(s.add_stat(StatKind::DiscoverSent));
        }
        assert!(!s.add_stat(StatKind::DiscoverSent));
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let s = stats(Duration::from_secs(5));
        s.increment(StatKind::AckReceived);
        let json = serde_json::to_value(s.snapshot()).unwrap();
        let first = &json["stats"][0];
        for field in [
            "stat_name",
            "stat_value",
            "stat_previous_ticker_value",
            "stat_rate_per_second",
        ] {
            assert!(first.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["hammer_type"], "dhcpv4");
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let s = stats(Duration::ZERO);
        assert_eq!(s.interval, Duration::from_secs(5));
    }
}
