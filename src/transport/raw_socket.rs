//! AF_PACKET / SOCK_RAW link implementation.
//!
//! Opens an `ETH_P_ALL` packet socket, attaches the optional classic BPF
//! program before binding (so no unfiltered frame is ever queued), binds to
//! one interface and optionally joins `PACKET_MR_PROMISC`.
//!
//! Requires `CAP_NET_RAW`, plus `CAP_NET_ADMIN` for promiscuous mode.

use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use super::filter::{to_sock_filters, BpfInstruction};
use super::{InterfaceInfo, PacketLink, RxFrame, TransportError};
use crate::packet::MacAddr;

/// Receive buffer size; large enough for any frame the NIC hands up.
const RX_BUFFER_LEN: usize = 65536;

pub struct RawSocket {
    fd: AtomicI32,
    info: InterfaceInfo,
    promiscuous: bool,
    rx_buf: Mutex<Vec<u8>>,
}

impl RawSocket {
    /// Open, filter, bind and optionally enter promiscuous mode.
    ///
    /// # Errors
    /// The first failing step. The descriptor is closed before returning.
    pub fn open(
        interface: &str,
        filter: Option<&[BpfInstruction]>,
        promiscuous: bool,
    ) -> Result<Self, TransportError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                eth_p_all() as i32,
            )
        };
        if fd < 0 {
            return Err(TransportError::Socket(std::io::Error::last_os_error()));
        }

        // From here on Drop closes the descriptor on any early return.
        let mut sock = Self {
            fd: AtomicI32::new(fd),
            info: InterfaceInfo {
                name: interface.to_string(),
                index: 0,
                mac: MacAddr::ZERO,
            },
            promiscuous: false,
            rx_buf: Mutex::new(vec![0u8; RX_BUFFER_LEN]),
        };

        if let Some(program) = filter {
            sock.attach_filter(program)?;
        }
        sock.info.index = resolve_ifindex(interface)?;
        sock.info.mac = read_interface_mac(interface)?;
        sock.bind()?;
        if promiscuous {
            sock.set_promiscuous(libc::PACKET_ADD_MEMBERSHIP)?;
            sock.promiscuous = true;
        }
        Ok(sock)
    }

    fn raw_fd(&self) -> Result<i32, TransportError> {
        match self.fd.load(Ordering::Acquire) {
            fd if fd >= 0 => Ok(fd),
            _ => Err(TransportError::Closed),
        }
    }

    fn attach_filter(&self, program: &[BpfInstruction]) -> Result<(), TransportError> {
        let mut filters = to_sock_filters(program);
        let fprog = libc::sock_fprog {
            len: filters.len() as libc::c_ushort,
            filter: filters.as_mut_ptr(),
        };
        // SAFETY: fprog points at `filters`, which outlives the call; the
        // kernel copies the program.
        let ret = unsafe {
            libc::setsockopt(
                self.raw_fd()?,
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &fprog as *const libc::sock_fprog as *const libc::c_void,
                std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::Filter(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn bind(&self) -> Result<(), TransportError> {
        let sll = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: eth_p_all(),
            sll_ifindex: self.info.index as i32,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        // SAFETY: sll is a fully initialised sockaddr_ll.
        let ret = unsafe {
            libc::bind(
                self.raw_fd()?,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::Bind {
                name: self.info.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// `PACKET_ADD_MEMBERSHIP` or `PACKET_DROP_MEMBERSHIP` with `PACKET_MR_PROMISC`.
    fn set_promiscuous(&self, action: libc::c_int) -> Result<(), TransportError> {
        let mreq = libc::packet_mreq {
            mr_ifindex: self.info.index as i32,
            mr_type: libc::PACKET_MR_PROMISC as libc::c_ushort,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        // SAFETY: mreq is a fully initialised packet_mreq.
        let ret = unsafe {
            libc::setsockopt(
                self.raw_fd()?,
                libc::SOL_PACKET,
                action,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::Promiscuous {
                name: self.info.name.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe { libc::close(fd) };
        }
    }
}

impl PacketLink for RawSocket {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let fd = self.raw_fd()?;
        // SAFETY: frame is a valid slice for the duration of the call.
        let ret = unsafe {
            libc::send(
                fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(TransportError::Send(std::io::Error::last_os_error()));
        }
        if ret as usize != frame.len() {
            return Err(TransportError::Send(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {ret} of {} bytes", frame.len()),
            )));
        }
        Ok(())
    }

    fn poll_frame(&self, timeout_ms: u64) -> Result<Option<RxFrame>, TransportError> {
        let fd = self.raw_fd()?;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms.min(i32::MAX as u64) as i32) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(TransportError::Recv(err));
        }
        if ret == 0 {
            return Ok(None);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(TransportError::Closed);
        }

        let mut buf = self.rx_buf.lock();
        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            return match err.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(None),
                _ => Err(TransportError::Recv(err)),
            };
        }
        Ok(Some(RxFrame {
            data: buf[..n as usize].to_vec(),
            outgoing: addr.sll_pkttype == libc::PACKET_OUTGOING as u8,
        }))
    }

    fn interface(&self) -> &InterfaceInfo {
        &self.info
    }

    fn close(&self) -> Result<(), TransportError> {
        let Ok(_) = self.raw_fd() else {
            return Ok(());
        };
        let promisc_result = if self.promiscuous {
            self.set_promiscuous(libc::PACKET_DROP_MEMBERSHIP)
        } else {
            Ok(())
        };
        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd >= 0 {
            unsafe { libc::close(fd) };
        }
        promisc_result
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interface helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `ETH_P_ALL` in network byte order, as both `socket()` and `sockaddr_ll` want it.
fn eth_p_all() -> u16 {
    (libc::ETH_P_ALL as u16).to_be()
}

pub fn resolve_ifindex(interface: &str) -> Result<u32, TransportError> {
    nix::net::if_::if_nametoindex(interface).map_err(|e| TransportError::Interface {
        name: interface.to_string(),
        reason: format!("if_nametoindex: {e}"),
    })
}

/// Read the hardware address of `interface` from `/sys/class/net/{interface}/address`.
pub fn read_interface_mac(interface: &str) -> Result<MacAddr, TransportError> {
    let path = format!("/sys/class/net/{interface}/address");
    let content = std::fs::read_to_string(&path).map_err(|e| TransportError::Interface {
        name: interface.to_string(),
        reason: format!("read {path}: {e}"),
    })?;
    content.trim().parse().map_err(|e| TransportError::Interface {
        name: interface.to_string(),
        reason: format!("{e}"),
    })
}

// =============================================================================
// Tests
// =============================================================================
