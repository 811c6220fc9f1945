//! Raw link-layer transport.
//!
//! [`Transport`] owns one [`PacketLink`] (an AF_PACKET socket in production,
//! [`MockLink`] in tests) and runs two loops over it:
//!
//! - the listener polls frames, drops locally originated echoes and empty
//!   reads, and hands each remaining frame to the registered receiver;
//! - the writer drains the send queue into the link.
//!
//! Shutdown order is listener, then handler (outside this module), then
//! writer. The descriptor itself is closed by [`Transport::deinit`], after
//! both loops are gone, so replies queued while the handler winds down are
//! still written.

pub mod filter;
pub mod mock;
pub mod raw_socket;

use std::any::Any;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::config::TransportOptions;
use crate::message::Message;
use crate::packet::{Frame, MacAddr};
use crate::shutdown::StopSignal;
use crate::sink::{ErrorSink, PayloadSink};

pub use filter::BpfInstruction;
pub use mock::MockLink;
pub use raw_socket::RawSocket;

/// How long one listener poll waits before re-checking for a stop request.
pub const LISTENER_POLL_MS: u64 = 100;

/// Callback invoked once per inbound frame; `false` means the frame was dropped.
pub type ReceiverFn = Arc<dyn Fn(Message) -> bool + Send + Sync>;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("AF_PACKET socket creation failed (requires CAP_NET_RAW): {0}")]
    Socket(std::io::Error),

    #[error("attaching kernel filter failed: {0}")]
    Filter(std::io::Error),

    #[error("interface '{name}': {reason}")]
    Interface { name: String, reason: String },

    #[error("binding to interface '{name}' failed: {source}")]
    Bind {
        name: String,
        source: std::io::Error,
    },

    #[error("promiscuous mode on '{name}': {source}")]
    Promiscuous {
        name: String,
        source: std::io::Error,
    },

    #[error("frame send failed: {0}")]
    Send(std::io::Error),

    #[error("frame receive failed: {0}")]
    Recv(std::io::Error),

    #[error("socket is closed")]
    Closed,

    #[error("listener started without a receiver")]
    NoReceiver,
}

// =============================================================================
// Link abstraction
// =============================================================================

/// Interface metadata resolved once when the link opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub index: u32,
    pub mac: MacAddr,
}

/// One frame read from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub data: Vec<u8>,
    /// Tagged `PACKET_OUTGOING` by the kernel: our own transmission echoed back.
    pub outgoing: bool,
}

/// Frame-level I/O on one interface.
///
/// Implementations must be usable from the listener and writer threads at
/// the same time.
pub trait PacketLink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout_ms` for one frame. `Ok(None)` on timeout.
    fn poll_frame(&self, timeout_ms: u64) -> Result<Option<RxFrame>, TransportError>;

    fn interface(&self) -> &InterfaceInfo;

    /// Leave promiscuous mode if enabled and release the descriptor.
    /// Idempotent.
    fn close(&self) -> Result<(), TransportError>;

    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// Transport
// =============================================================================

pub struct Transport {
    link: Arc<dyn PacketLink>,
    gateway_mac: MacAddr,
    receiver: RwLock<Option<ReceiverFn>>,
    payload_tx: RwLock<Option<Sender<Vec<u8>>>>,
    payload_rx: Receiver<Vec<u8>>,
    listener: StopSignal,
    writer: StopSignal,
    errors: ErrorSink,
}

impl Transport {
    /// Open an AF_PACKET socket on the configured interface.
    ///
    /// # Errors
    /// Any socket, filter, interface or bind failure. Nothing is left open on
    /// error.
    pub fn init(
        options: &TransportOptions,
        filter: Option<&[BpfInstruction]>,
        errors: ErrorSink,
    ) -> Result<Self, TransportError> {
        let link = RawSocket::open(&options.interface, filter, options.promiscuous)?;
        tracing::info!(
            iface = %options.interface,
            ifindex = link.interface().index,
            mac = %link.interface().mac,
            promisc = options.promiscuous,
            filtered = filter.is_some(),
            "raw socket bound"
        );
        Ok(Self::with_link(Arc::new(link), options, errors))
    }

    /// Wrap an already open link.
    pub fn with_link(
        link: Arc<dyn PacketLink>,
        options: &TransportOptions,
        errors: ErrorSink,
    ) -> Self {
        let (payload_tx, payload_rx) = bounded(options.send_queue_depth);
        Self {
            link,
            gateway_mac: options.gateway_mac,
            receiver: RwLock::new(None),
            payload_tx: RwLock::new(Some(payload_tx)),
            payload_rx,
            listener: StopSignal::new(),
            writer: StopSignal::new(),
            errors,
        }
    }

    pub fn interface(&self) -> &InterfaceInfo {
        self.link.interface()
    }

    pub fn gateway_mac(&self) -> MacAddr {
        self.gateway_mac
    }

    pub fn link(&self) -> &Arc<dyn PacketLink> {
        &self.link
    }

    /// Register the per-frame dispatch callback. Must happen before
    /// [`run_listener`](Self::run_listener).
    pub fn set_receiver(&self, receiver: ReceiverFn) {
        *self.receiver.write() = Some(receiver);
    }

    /// Blocking receive loop. Returns `Ok` when
    /// [`stop_listener`](Self::stop_listener) is called and
    /// `Err(TransportError::Closed)` if the link goes away underneath it.
    pub fn run_listener(&self) -> Result<(), TransportError> {
        let receiver = self
            .receiver
            .read()
            .clone()
            .ok_or(TransportError::NoReceiver)?;
        let Some(_done) = self.listener.start() else {
            return Ok(());
        };
        tracing::debug!(iface = %self.interface().name, "listener started");

        while !self.listener.finish_requested() {
            match self.link.poll_frame(LISTENER_POLL_MS) {
                Ok(Some(rx)) => {
                    if rx.outgoing || rx.data.is_empty() {
                        continue;
                    }
                    // Best effort: a full handler queue drops the frame.
                    receiver(Message::new(Frame::new(rx.data)));
                }
                Ok(None) => {}
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(e) => {
                    (self.errors)(e.into());
                }
            }
        }
        tracing::debug!(iface = %self.interface().name, "listener stopped");
        Ok(())
    }

    /// Blocking send loop. Returns once the queue is closed and drained.
    pub fn run_writer(&self) {
        let Some(_done) = self.writer.start() else {
            return;
        };
        tracing::debug!(iface = %self.interface().name, "writer started");
        for payload in self.payload_rx.iter() {
            if let Err(e) = self.link.send_frame(&payload) {
                (self.errors)(e.into());
            }
        }
        tracing::debug!(iface = %self.interface().name, "writer drained");
    }

    /// Queue one frame for the writer. Blocks until the writer takes it (or a
    /// slot frees up when `send_queue_depth > 0`). `false` once the queue is
    /// closed.
    pub fn add_payload(&self, payload: Vec<u8>) -> bool {
        match self.payload_tx.read().as_ref() {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// [`add_payload`](Self::add_payload) as a sink closure.
    pub fn payload_sink(self: &Arc<Self>) -> PayloadSink {
        let transport = Arc::clone(self);
        Arc::new(move |payload| transport.add_payload(payload))
    }

    /// Signal the listener and block until it has exited. The socket stays
    /// open for the writer; [`deinit`](Self::deinit) closes it.
    pub fn stop_listener(&self) {
        self.listener.stop();
    }

    /// Close the send queue and block until the writer has flushed it.
    pub fn stop_writer(&self) {
        drop(self.payload_tx.write().take());
        self.writer.wait();
    }

    pub fn is_listening(&self) -> bool {
        !self.listener.is_done()
    }

    pub fn is_accepting(&self) -> bool {
        self.payload_tx.read().is_some()
    }

    /// Release the socket. Safe to call more than once.
    pub fn deinit(&self) -> Result<(), TransportError> {
        self.link.close()
    }
}

// =============================================================================
// Tests
// =============================================================================
