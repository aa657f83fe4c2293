//! Radar protocol implementations.
//!
//! One module per vendor family, each providing:
//! - **Beacon parsing** - discovery/announcement packet parsing
//! - **Report parsing** - status reports into control/state updates
//! - **Spoke parsing** - data datagrams into normalized spokes
//! - **Command encoding** - control changes into wire datagrams
//!
//! All functions are pure: `&[u8]` in, `Result<T, ParseError>` out. Packed
//! wire structs derive `Deserialize` and are decoded with `bincode`, so a
//! struct definition is also its layout documentation.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};

#[cfg(feature = "navico")]
pub mod navico;

#[cfg(feature = "raymarine")]
pub mod raymarine;

#[cfg(feature = "garmin")]
pub mod garmin;

// =============================================================================
// Wire-layout socket addresses
// =============================================================================

/// An IPv4 address + port with known big-endian wire layout.
///
/// Navico beacons carry addresses in network byte order.
#[derive(Deserialize, Copy, Clone)]
#[repr(C)]
pub struct NetworkSocketAddrV4 {
    addr: [u8; 4],
    port: [u8; 2],
}

impl From<NetworkSocketAddrV4> for SocketAddrV4 {
    fn from(item: NetworkSocketAddrV4) -> Self {
        SocketAddrV4::new(
            u32::from_be_bytes(item.addr).into(),
            u16::from_be_bytes(item.port),
        )
    }
}

impl std::fmt::Display for NetworkSocketAddrV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            Ipv4Addr::from(u32::from_be_bytes(self.addr)),
            u16::from_be_bytes(self.port)
        )
    }
}

impl std::fmt::Debug for NetworkSocketAddrV4 {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("NetworkSocketAddrV4")
            .field("addr", &self.addr)
            .field("port", &format_args!("{}", u16::from_be_bytes(self.port)))
            .finish()
    }
}

/// An IPv4 address + port with little-endian wire layout.
///
/// Raymarine endpoint beacons store both fields little-endian.
#[derive(Deserialize, Copy, Clone)]
#[repr(C)]
pub struct LittleEndianSocketAddrV4 {
    addr: [u8; 4],
    port: [u8; 2],
}

impl From<LittleEndianSocketAddrV4> for SocketAddrV4 {
    fn from(item: LittleEndianSocketAddrV4) -> Self {
        SocketAddrV4::new(
            u32::from_le_bytes(item.addr).into(),
            u16::from_le_bytes(item.port),
        )
    }
}

impl std::fmt::Display for LittleEndianSocketAddrV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            Ipv4Addr::from(u32::from_le_bytes(self.addr)),
            u16::from_le_bytes(self.port)
        )
    }
}

impl std::fmt::Debug for LittleEndianSocketAddrV4 {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("LittleEndianSocketAddrV4")
            .field("addr", &self.addr)
            .field("port", &format_args!("{}", u16::from_le_bytes(self.port)))
            .finish()
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Extract a null-terminated C string from bytes.
pub fn c_string(bytes: &[u8]) -> Option<String> {
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..null_pos])
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"hello\0world"), Some("hello".to_string()));
        assert_eq!(c_string(b"hello"), Some("hello".to_string()));
        assert_eq!(c_string(b"\0"), None);
        assert_eq!(c_string(b"  QuantumRadar  \0"), Some("QuantumRadar".to_string()));
    }

    #[test]
    fn test_network_socket_addr() {
        let bytes: [u8; 6] = [236, 6, 7, 5, 0x1a, 0xde]; // 236.6.7.5:6878
        let parsed: NetworkSocketAddrV4 = bincode::deserialize(&bytes).unwrap();
        let addr: SocketAddrV4 = parsed.into();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 5), 6878));
    }

    #[test]
    fn test_little_endian_socket_addr() {
        let bytes: [u8; 6] = [10, 30, 200, 2, 0x0a, 0x09]; // stored LE: 2.200.30.10:2314
        let parsed: LittleEndianSocketAddrV4 = bincode::deserialize(&bytes).unwrap();
        let addr: SocketAddrV4 = parsed.into();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(2, 200, 30, 10), 2314));
    }
}
