//! Callback sinks the core writes into.
//!
//! Generators and handlers never touch the socket, the stats table or the
//! logger directly; they get a [`Sinks`] bundle of fire-and-forget closures.
//! Every sink returns `false` when its destination is full or closed.

use std::sync::Arc;

use crossbeam_channel::{bounded, select, Receiver};

use crate::error::HammerError;
use crate::shutdown::StopSignal;
use crate::stats::StatKind;

pub type LogSink = Arc<dyn Fn(String) -> bool + Send + Sync>;
pub type ErrorSink = Arc<dyn Fn(HammerError) -> bool + Send + Sync>;
pub type StatSink = Arc<dyn Fn(StatKind) -> bool + Send + Sync>;
pub type PayloadSink = Arc<dyn Fn(Vec<u8>) -> bool + Send + Sync>;

/// Capacity of the log and error channels.
pub const SINK_CHANNEL_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct Sinks {
    pub log: LogSink,
    pub error: ErrorSink,
    pub stat: StatSink,
    pub payload: PayloadSink,
}

impl Sinks {
    pub fn log(&self, msg: impl Into<String>) -> bool {
        (self.log)(msg.into())
    }

    pub fn error(&self, err: impl Into<HammerError>) -> bool {
        (self.error)(err.into())
    }

    pub fn stat(&self, kind: StatKind) -> bool {
        (self.stat)(kind)
    }

    pub fn send(&self, frame: Vec<u8>) -> bool {
        (self.payload)(frame)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel-backed log and error sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded log channel; `try_send` drops entries when full.
pub fn log_channel() -> (LogSink, Receiver<String>) {
    let (tx, rx) = bounded::<String>(SINK_CHANNEL_CAPACITY);
    (Arc::new(move |msg| tx.try_send(msg).is_ok()), rx)
}

/// Bounded error channel; `try_send` drops entries when full.
pub fn error_channel() -> (ErrorSink, Receiver<HammerError>) {
    let (tx, rx) = bounded::<HammerError>(SINK_CHANNEL_CAPACITY);
    (Arc::new(move |err| tx.try_send(err).is_ok()), rx)
}

/// Forward log entries to `tracing` until stopped, then drain what is left.
pub fn run_log_reader(rx: Receiver<String>, signal: &StopSignal) {
    let Some(_done) = signal.start() else {
        return;
    };
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(msg) => tracing::info!(target: "dhammer", "{msg}"),
                Err(_) => return,
            },
            recv(signal.finish_receiver()) -> _ => break,
        }
    }
    for msg in rx.try_iter() {
        tracing::info!(target: "dhammer", "{msg}");
    }
}

/// Forward runtime errors to `tracing` until stopped, then drain what is left.
pub fn run_error_reader(rx: Receiver<HammerError>, signal: &StopSignal) {
    let Some(_done) = signal.start() else {
        return;
    };
    loop {
        select! {
            recv(rx) -> err => match err {
                Ok(err) => tracing::error!(target: "dhammer", error = %err, "runtime error"),
                Err(_) => return,
            },
            recv(signal.finish_receiver()) -> _ => break,
        }
    }
    for err in rx.try_iter() {
        tracing::error!(target: "dhammer", error = %err, "runtime error");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Sinks that record everything into shared vectors.
    #[derive(Default, Clone)]
    pub struct Recorded {
        pub logs: Arc<Mutex<Vec<String>>>,
        pub errors: Arc<Mutex<Vec<String>>>,
        pub stats: Arc<Mutex<Vec<StatKind>>>,
        pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Recorded {
        pub fn sinks(&self) -> Sinks {
            let logs = Arc::clone(&self.logs);
            let errors = Arc::clone(&self.errors);
            let stats = Arc::clone(&self.stats);
            let frames = Arc::clone(&self.frames);
            Sinks {
                log: Arc::new(move |m| {
                    logs.lock().push(m);
                    true
                }),
                error: Arc::new(move |e| {
                    errors.lock().push(e.to_string());
                    true
                }),
                stat: Arc::new(move |s| {
                    stats.lock().push(s);
                    true
                }),
                payload: Arc::new(move |f| {
                    frames.lock().push(f);
                    true
                }),
            }
        }

        pub fn count(&self, kind: StatKind) -> usize {
            self.stats.lock().iter().filter(|s| **s == kind).count()
        }
    }
}
