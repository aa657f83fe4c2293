//! Tokio implementation of IoProvider for the native driver.
//!
//! Wraps tokio UDP sockets in the poll-based interface that
//! `pelorus_core::Locator` expects: non-blocking receives returning `None`
//! when nothing is pending, with the caller owning the polling cadence.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;

use pelorus_core::io::{IoError, IoProvider, UdpSocketHandle};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::network::usable_interface_addresses;

struct UdpSocketState {
    socket: UdpSocket,
}

/// Tokio-backed [`IoProvider`].
pub struct TokioIoProvider {
    next_handle: i32,
    udp_sockets: HashMap<i32, UdpSocketState>,
    start_time: Instant,
    /// Restrict interface enumeration to one named interface.
    interface_filter: Option<String>,
}

impl TokioIoProvider {
    pub fn new(interface_filter: Option<String>) -> Self {
        Self {
            next_handle: 1,
            udp_sockets: HashMap::new(),
            start_time: Instant::now(),
            interface_filter,
        }
    }

    fn alloc_handle(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn make_socket(port: u16) -> Result<UdpSocket, IoError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| IoError::new(-1, format!("Failed to create socket: {}", e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| IoError::new(-1, format!("Failed to set non-blocking: {}", e)))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| IoError::new(-1, format!("Failed to set reuse address: {}", e)))?;
        #[cfg(unix)]
        {
            let _ = socket.set_reuse_port(true);
        }
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| IoError::new(-1, format!("Failed to bind to port {}: {}", port, e)))?;
        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
            .map_err(|e| IoError::new(-1, format!("Failed to convert to tokio socket: {}", e)))
    }
}

impl Default for TokioIoProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IoProvider for TokioIoProvider {
    fn udp_create(&mut self) -> Result<UdpSocketHandle, IoError> {
        let socket = Self::make_socket(0)?;
        let handle = self.alloc_handle();
        self.udp_sockets.insert(handle, UdpSocketState { socket });
        Ok(UdpSocketHandle(handle))
    }

    fn udp_bind(&mut self, socket: &UdpSocketHandle, port: u16) -> Result<(), IoError> {
        let state = self
            .udp_sockets
            .get_mut(&socket.0)
            .ok_or_else(|| IoError::new(-1, "Invalid socket handle"))?;

        // If already bound to the right port we are done; tokio sockets
        // cannot rebind, so otherwise the socket is recreated
        if let Ok(addr) = state.socket.local_addr() {
            if addr.port() == port || port == 0 {
                return Ok(());
            }
        }
        state.socket = Self::make_socket(port)?;
        Ok(())
    }

    fn udp_set_broadcast(
        &mut self,
        socket: &UdpSocketHandle,
        enabled: bool,
    ) -> Result<(), IoError> {
        let state = self
            .udp_sockets
            .get(&socket.0)
            .ok_or_else(|| IoError::new(-1, "Invalid socket handle"))?;
        state
            .socket
            .set_broadcast(enabled)
            .map_err(|e| IoError::new(-1, format!("Failed to set broadcast: {}", e)))
    }

    fn udp_join_multicast(
        &mut self,
        socket: &UdpSocketHandle,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> Result<(), IoError> {
        let state = self
            .udp_sockets
            .get(&socket.0)
            .ok_or_else(|| IoError::new(-1, "Invalid socket handle"))?;

        // Linux is special, if we don't disable IP_MULTICAST_ALL the kernel
        // forgets on which device the multicast packet arrived and sends it
        // to all sockets.
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;

            unsafe {
                let optval: libc::c_int = 0;
                let ret = libc::setsockopt(
                    state.socket.as_raw_fd(),
                    libc::SOL_IP,
                    libc::IP_MULTICAST_ALL,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of_val(&optval) as libc::socklen_t,
                );
                if ret != 0 {
                    log::warn!(
                        "Failed to disable IP_MULTICAST_ALL: {}",
                        std::io::Error::last_os_error()
                    );
                }
            }
        }

        state
            .socket
            .join_multicast_v4(group, interface)
            .map_err(|e| IoError::new(-1, format!("Failed to join multicast {}: {}", group, e)))
    }

    fn udp_send_to(
        &mut self,
        socket: &UdpSocketHandle,
        data: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, IoError> {
        let state = self
            .udp_sockets
            .get(&socket.0)
            .ok_or_else(|| IoError::new(-1, "Invalid socket handle"))?;
        state
            .socket
            .try_send_to(data, SocketAddr::V4(addr))
            .map_err(|e| IoError::new(-1, format!("Send failed: {}", e)))
    }

    fn udp_recv_from(
        &mut self,
        socket: &UdpSocketHandle,
        buf: &mut [u8],
    ) -> Option<(usize, SocketAddrV4)> {
        let state = self.udp_sockets.get(&socket.0)?;
        match state.socket.try_recv_from(buf) {
            Ok((len, SocketAddr::V4(addr))) => Some((len, addr)),
            Ok((_, SocketAddr::V6(_))) => None,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(_) => None,
        }
    }

    fn udp_close(&mut self, socket: UdpSocketHandle) {
        self.udp_sockets.remove(&socket.0);
    }

    fn udp_bind_interface(
        &mut self,
        socket: &UdpSocketHandle,
        interface: Ipv4Addr,
    ) -> Result<(), IoError> {
        let state = self
            .udp_sockets
            .get(&socket.0)
            .ok_or_else(|| IoError::new(-1, "Invalid socket handle"))?;

        // Outgoing multicast/probe packets leave via this NIC; receive
        // stays bound to 0.0.0.0
        socket2::SockRef::from(&state.socket)
            .set_multicast_if_v4(&interface)
            .map_err(|e| IoError::new(-1, format!("Failed to set multicast interface: {}", e)))
    }

    fn interface_addresses(&mut self) -> Vec<Ipv4Addr> {
        let addrs = usable_interface_addresses(self.interface_filter.as_deref());
        if addrs.is_empty() {
            vec![Ipv4Addr::UNSPECIFIED]
        } else {
            addrs
        }
    }

    fn current_time_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_ms() {
        let io = TokioIoProvider::default();
        let time1 = io.current_time_ms();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = io.current_time_ms();
        assert!(time2 >= time1 + 10);
    }

    #[test]
    fn test_handle_allocation() {
        let mut io = TokioIoProvider::default();
        let h1 = io.alloc_handle();
        let h2 = io.alloc_handle();
        assert_ne!(h1, h2);
    }
}
