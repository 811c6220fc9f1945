//! In-memory [`PacketLink`] for tests and dry runs.
//!
//! Records every sent frame and replays queued inbound frames. Also used by
//! the orchestrator tests to run a whole hammer without CAP_NET_RAW.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{InterfaceInfo, PacketLink, RxFrame, TransportError};
use crate::packet::MacAddr;

pub struct MockLink {
    info: InterfaceInfo,
    sent: Mutex<Vec<Vec<u8>>>,
    rx_queue: Mutex<VecDeque<RxFrame>>,
    fail_next_send: AtomicBool,
    closed: AtomicBool,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new(InterfaceInfo {
            name: "mock0".to_string(),
            index: 1,
            mac: MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]),
        })
    }
}

impl MockLink {
    pub fn new(info: InterfaceInfo) -> Self {
        Self {
            info,
            sent: Mutex::new(Vec::new()),
            rx_queue: Mutex::new(VecDeque::new()),
            fail_next_send: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a frame for the listener to pick up.
    pub fn push_rx(&self, data: Vec<u8>, outgoing: bool) {
        self.rx_queue.lock().push_back(RxFrame { data, outgoing });
    }

    pub fn rx_is_empty(&self) -> bool {
        self.rx_queue.lock().is_empty()
    }

    /// Frames written so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Make the next `send_frame` fail with an I/O error.
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PacketLink for MockLink {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Send(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock: simulated send failure",
            )));
        }
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn poll_frame(&self, timeout_ms: u64) -> Result<Option<RxFrame>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(frame) = self.rx_queue.lock().pop_front() {
            return Ok(Some(frame));
        }
        std::thread::sleep(Duration::from_millis(timeout_ms.min(2)));
        Ok(None)
    }

    fn interface(&self) -> &InterfaceInfo {
        &self.info
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_link_records_and_replays() {
        let link = MockLink::default();
        link.push_rx(vec![1], false);
        assert_eq!(
            link.poll_frame(0).unwrap(),
            Some(RxFrame {
                data: vec![1],
                outgoing: false
            })
        );
        assert_eq!(link.poll_frame(0).unwrap(), None);
        link.send_frame(&[5, 6]).unwrap();
        assert_eq!(link.sent(), vec![vec![5, 6]]);
    }

    #[test]
    fn test_mock_link_fail_next_send_is_one_shot() {
        let link = MockLink::default();
        link.fail_next_send();
        assert!(link.send_frame(&[1]).is_err());
        assert!(link.send_frame(&[2]).is_ok());
        assert_eq!(link.sent_count(), 1);
    }

    #[test]
    fn test_mock_link_closed_rejects_io() {
        let link = MockLink::default();
        link.close().unwrap();
        assert!(matches!(link.send_frame(&[1]), Err(TransportError::Closed)));
        assert!(matches!(link.poll_frame(0), Err(TransportError::Closed)));
    }

    #[test]
    fn test_mock_link_downcast_via_trait_object() {
        let link: Box<dyn PacketLink> = Box::new(MockLink::default());
        assert!(link.as_any().downcast_ref::<MockLink>().is_some());
    }
}
