//! Socket construction and interface enumeration.
//!
//! All radar traffic is UDP multicast, and every scanner family has its own
//! opinions about group membership, so socket setup is centralized here.

use socket2::{Domain, Protocol, Type};
use std::net::SocketAddrV4;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use tokio::net::UdpSocket;

// this will be common for all our sockets
pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // we're going to use read timeouts so that we don't hang waiting for packets
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;

    Ok(socket)
}

/// On Windows, unlike all Unix variants, it is improper to bind to the multicast address
///
/// see https://msdn.microsoft.com/en-us/library/windows/desktop/ms737550(v=vs.85).aspx
#[cfg(windows)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding multicast socket to {}", socketaddr);

    Ok(())
}

/// On unixes we bind to the multicast address, which causes multicast packets to be filtered
#[cfg(unix)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    // Linux is special, if we don't disable IP_MULTICAST_ALL the kernel forgets on
    // which device the multicast packet arrived and sends it to all sockets.
    #[cfg(target_os = "linux")]
    {
        use std::{mem, os::unix::io::AsRawFd};

        unsafe {
            let optval: libc::c_int = 0;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_IP,
                libc::IP_MULTICAST_ALL,
                &optval as *const _ as *const libc::c_void,
                mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    let socketaddr = SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;

    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    log::trace!(
        "Binding multicast socket to {} for multicast group {} nic {}",
        socketaddr,
        addr.ip(),
        nic_addr
    );

    Ok(())
}

/// Listening socket for a radar's multicast group via one NIC.
pub fn create_udp_multicast_listen(
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<UdpSocket> {
    let socket: socket2::Socket = new_socket()?;

    bind_to_multicast(&socket, addr, nic_addr)?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Sending socket connected to a radar's command address via one NIC.
pub fn create_multicast_send(addr: &SocketAddrV4, nic_addr: &Ipv4Addr) -> io::Result<UdpSocket> {
    let socket: socket2::Socket = new_socket()?;

    let socketaddr = SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port());
    let socketaddr_nic = SocketAddr::new(IpAddr::V4(*nic_addr), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr_nic))?;
    socket.connect(&socket2::SockAddr::from(socketaddr))?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

pub fn match_ipv4(addr: &Ipv4Addr, bcast: &Ipv4Addr, netmask: &Ipv4Addr) -> bool {
    let r = addr & netmask;
    let b = bcast & netmask;
    r == b
}

/// All usable IPv4 interface addresses: up, non-loopback, multicast-capable.
/// `only` limits the result to a single named interface.
pub fn usable_interface_addresses(only: Option<&str>) -> Vec<Ipv4Addr> {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    let mut result = Vec::new();
    let Ok(interfaces) = NetworkInterface::show() else {
        return result;
    };
    for itf in &interfaces {
        if let Some(only) = only {
            if itf.name != only {
                continue;
            }
        }
        for addr in &itf.addr {
            if let IpAddr::V4(nic_ip) = addr.ip() {
                if !nic_ip.is_loopback() && !nic_ip.is_unspecified() {
                    result.push(nic_ip);
                }
            }
        }
    }
    result
}

/// Find the NIC address that can reach a given radar IP.
///
/// Returns the first interface IP on the radar's subnet, else the first
/// non-loopback interface.
pub fn find_nic_for_radar(radar_ip: &Ipv4Addr) -> Option<Ipv4Addr> {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    let interfaces = NetworkInterface::show().ok()?;

    for itf in &interfaces {
        for addr in &itf.addr {
            if let (IpAddr::V4(nic_ip), Some(IpAddr::V4(netmask))) = (addr.ip(), addr.netmask()) {
                if !nic_ip.is_loopback() && match_ipv4(&nic_ip, radar_ip, &netmask) {
                    log::debug!("Found NIC {} ({}) for radar {}", itf.name, nic_ip, radar_ip);
                    return Some(nic_ip);
                }
            }
        }
    }

    for itf in &interfaces {
        for addr in &itf.addr {
            if let IpAddr::V4(nic_ip) = addr.ip() {
                if !nic_ip.is_loopback() {
                    log::debug!(
                        "Fallback NIC {} ({}) for radar {} (no subnet match)",
                        itf.name,
                        nic_ip,
                        radar_ip
                    );
                    return Some(nic_ip);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_ipv4() {
        let netmask = Ipv4Addr::new(255, 255, 255, 0);
        assert!(match_ipv4(
            &Ipv4Addr::new(192, 168, 1, 5),
            &Ipv4Addr::new(192, 168, 1, 200),
            &netmask
        ));
        assert!(!match_ipv4(
            &Ipv4Addr::new(192, 168, 2, 5),
            &Ipv4Addr::new(192, 168, 1, 200),
            &netmask
        ));
    }
}
