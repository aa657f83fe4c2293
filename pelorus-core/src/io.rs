//! I/O abstraction for platform-independent radar code.
//!
//! The locator and command encoders must run without owning real sockets,
//! so all socket operations go through the [`IoProvider`] trait. The native
//! driver implements it on top of tokio; tests implement it with in-memory
//! queues.
//!
//! The interface is **poll-based** (not async): receive operations return
//! `None` when nothing is pending, and the driver decides how often to poll.
//! All three vendor families are UDP-only, so only datagram operations are
//! exposed.

use core::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

// =============================================================================
// Error Types
// =============================================================================

/// I/O error for socket operations, kept minimal so exotic platforms only
/// need an error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    /// Error code (negative values indicate errors)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
}

impl IoError {
    /// Create a new I/O error with a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error from just a code (message will be generic).
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: format!("I/O error: {}", code),
        }
    }

    /// Create a "would block" error (no data available, non-blocking).
    pub fn would_block() -> Self {
        Self::new(-11, "Operation would block")
    }

    /// Create an "address in use" error.
    pub fn address_in_use() -> Self {
        Self::new(-98, "Address already in use")
    }

    /// Check if this is a "would block" error.
    pub fn is_would_block(&self) -> bool {
        self.code == -11
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

// =============================================================================
// Socket Handle
// =============================================================================

/// Opaque handle to a UDP socket.
///
/// The actual socket lives in the `IoProvider` implementation; this is just
/// an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UdpSocketHandle(pub i32);

// =============================================================================
// IoProvider Trait
// =============================================================================

/// Platform-independent datagram I/O provider.
///
/// Receive operations never block: they return `None` when no datagram is
/// pending. The caller owns the polling cadence, which keeps the discovery
/// engine deterministic and testable.
pub trait IoProvider {
    /// Create a new UDP socket.
    fn udp_create(&mut self) -> Result<UdpSocketHandle, IoError>;

    /// Bind a UDP socket to a port. Use port 0 to let the OS choose.
    fn udp_bind(&mut self, socket: &UdpSocketHandle, port: u16) -> Result<(), IoError>;

    /// Enable or disable broadcast mode on a UDP socket.
    fn udp_set_broadcast(&mut self, socket: &UdpSocketHandle, enabled: bool)
        -> Result<(), IoError>;

    /// Join a multicast group on the given local interface address.
    fn udp_join_multicast(
        &mut self,
        socket: &UdpSocketHandle,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> Result<(), IoError>;

    /// Send a datagram to a specific address. Returns bytes sent.
    fn udp_send_to(
        &mut self,
        socket: &UdpSocketHandle,
        data: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, IoError>;

    /// Receive a datagram (non-blocking).
    ///
    /// Returns `None` if no data is available, else `(len, sender)`.
    fn udp_recv_from(
        &mut self,
        socket: &UdpSocketHandle,
        buf: &mut [u8],
    ) -> Option<(usize, SocketAddrV4)>;

    /// Close a UDP socket.
    fn udp_close(&mut self, socket: UdpSocketHandle);

    /// Bind a UDP socket to a specific interface IP for outgoing packets.
    ///
    /// Used for probe sockets in multi-NIC setups so the wake datagram goes
    /// out on the interface being scanned. Default uses OS routing.
    fn udp_bind_interface(
        &mut self,
        _socket: &UdpSocketHandle,
        _interface: Ipv4Addr,
    ) -> Result<(), IoError> {
        Ok(())
    }

    /// Usable IPv4 interface addresses: non-loopback and multicast-capable.
    ///
    /// The default is the unspecified address, which lets the OS pick one
    /// interface. Multi-NIC drivers should enumerate for real.
    fn interface_addresses(&mut self) -> Vec<Ipv4Addr> {
        vec![Ipv4Addr::UNSPECIFIED]
    }

    /// Current timestamp in milliseconds since an arbitrary, monotonic epoch.
    fn current_time_ms(&self) -> u64;

    /// Log a debug message through the platform's logging facility.
    fn debug(&self, msg: &str);

    /// Log an info message through the platform's logging facility.
    fn info(&self, msg: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = IoError::new(-1, "Test error");
        assert_eq!(format!("{}", err), "Test error (code -1)");
    }

    #[test]
    fn test_io_error_would_block() {
        let err = IoError::would_block();
        assert!(err.is_would_block());
        assert!(!IoError::address_in_use().is_would_block());
    }
}
