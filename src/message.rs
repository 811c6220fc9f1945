//! One inbound frame on its way from the transport to a handler.

use std::net::IpAddr;

use crate::packet::Frame;

/// A received frame plus whatever remote endpoint the transport knew about.
///
/// Link-layer sockets have no remote endpoint, so `remote_addr` and
/// `remote_port` stay empty for AF_PACKET traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub remote_addr: Option<IpAddr>,
    pub remote_port: Option<u16>,
    pub frame: Frame,
}

impl Message {
    pub fn new(frame: Frame) -> Self {
        Self {
            remote_addr: None,
            remote_port: None,
            frame,
        }
    }

    pub fn with_remote(mut self, addr: IpAddr, port: u16) -> Self {
        self.remote_addr = Some(addr);
        self.remote_port = Some(port);
        self
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::new(Frame::new(data))
    }
}
