//! Inbound frame handlers.
//!
//! The transport listener calls [`Handler::receive_message`] for every
//! frame; that call only enqueues (never blocks) and the handler's own
//! thread does the protocol work in arrival order.

pub mod dhcpv4;
pub mod tcpconn;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::error::HammerError;
use crate::message::Message;
use crate::shutdown::StopSignal;

pub use dhcpv4::{AddressBinder, DhcpV4Handler, IpCommandBinder};
pub use tcpconn::TcpConnHandler;

/// Handler input queue capacity; frames beyond it are dropped.
pub const HANDLER_QUEUE_CAPACITY: usize = 10_000;

pub trait Handler: Send + Sync {
    fn init(&self) -> Result<(), HammerError> {
        Ok(())
    }

    /// Non-blocking enqueue. `false` when the queue is full or closed.
    fn receive_message(&self, msg: Message) -> bool;

    /// Process queued messages until the queue is closed.
    fn run(&self);

    /// Close the queue and block until `run` has returned.
    fn stop(&self);

    fn deinit(&self) -> Result<(), HammerError> {
        Ok(())
    }
}

/// Bounded single-consumer queue with the close-then-drain handshake both
/// handlers share.
pub struct MessageQueue {
    tx: RwLock<Option<Sender<Message>>>,
    rx: Receiver<Message>,
    signal: StopSignal,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::with_capacity(HANDLER_QUEUE_CAPACITY)
    }
}

impl MessageQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx,
            signal: StopSignal::new(),
        }
    }

    pub fn push(&self, msg: Message) -> bool {
        match self.tx.read().as_ref() {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Feed every message to `handle` until the queue is closed and drained.
    pub fn run(&self, mut handle: impl FnMut(Message)) {
        let Some(_done) = self.signal.start() else {
            return;
        };
        for msg in self.rx.iter() {
            handle(msg);
        }
    }

    pub fn close(&self) {
        drop(self.tx.write().take());
        self.signal.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_queue_full_drops() {
        let q = MessageQueue::with_capacity(2);
        assert!(q.push(Message::from(vec![1])));
        assert!(q.push(Message::from(vec![2])));
        assert!(!q.push(Message::from(vec![3])));
    }

    #[test]
    fn test_full_default_queue_drops_without_blocking() {
        let q = MessageQueue::default();
        for i in 0..HANDLER_QUEUE_CAPACITY {
            assert!(q.push(Message::from(vec![i as u8])), "push {i} fits");
        }
        let start = std::time::Instant::now();
        assert!(!q.push(Message::from(vec![0xff])));
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
        assert_eq!(q.rx.len(), HANDLER_QUEUE_CAPACITY, "overflow frame was dropped");
        let first = q.rx.try_recv().unwrap();
        assert_eq!(first.frame.as_bytes(), [0]);
    }

    #[test]
    fn test_close_drains_in_order_then_rejects() {
        let q = Arc::new(MessageQueue::default());
        for i in 0..5u8 {
            q.push(Message::from(vec![i]));
        }
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (runner, sink) = (Arc::clone(&q), Arc::clone(&seen));
        let handle = std::thread::spawn(move || {
            runner.run(|m| sink.lock().push(m.frame.as_bytes()[0]));
        });
        q.close();
        handle.join().unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert!(!q.push(Message::from(vec![9])));
    }

    #[test]
    fn test_close_without_run_returns() {
        let q = MessageQueue::default();
        q.close();
        assert!(!q.push(Message::from(vec![1])));
    }
}
