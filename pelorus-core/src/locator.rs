//! Radar discovery
//!
//! Listens for vendor announcement datagrams on the well-known multicast
//! groups, sends the wake/probe datagrams some scanners require before they
//! announce, and routes each parsed announcement into a radar slot. Slot
//! routing is what keeps a fleet of physical units (and the two logical
//! channels of a dual radome) stable across address changes: a radar that
//! reboots with a new DHCP lease must land back in its old slot, not create
//! a phantom second radar.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::io::{IoProvider, UdpSocketHandle};
#[cfg(feature = "garmin")]
use crate::protocol::garmin;
#[cfg(feature = "navico")]
use crate::protocol::navico;
#[cfg(feature = "raymarine")]
use crate::protocol::raymarine;
use crate::radar::{RadarDiscovery, RadarLocationInfo};
use crate::Brand;

/// Send probes this often.
const PROBE_INTERVAL_MS: u64 = 30_000;

/// Re-enumerate interfaces and re-join multicast groups this often.
const RESCAN_INTERVAL_MS: u64 = 60_000;

/// Event produced by [`Locator::poll`].
#[derive(Debug, Clone)]
pub enum LocatorEvent {
    /// A radar landed in a previously empty slot.
    RadarDiscovered { slot: usize, discovery: RadarDiscovery },
    /// A known radar's addresses changed.
    RadarUpdated { slot: usize, discovery: RadarDiscovery },
}

/// One logical radar position. Slots survive the radar disappearing and
/// reappearing; the location is only replaced, never silently dropped.
#[derive(Debug, Clone)]
pub struct RadarSlot {
    pub brand: Brand,
    /// Channel suffix for dual radomes ("A"/"B"), None for single-channel.
    pub suffix: Option<String>,
    pub location: Option<RadarLocationInfo>,
    pub discovery: Option<RadarDiscovery>,
    pub last_seen_ms: u64,
}

impl RadarSlot {
    fn role_matches(&self, d: &RadarDiscovery) -> bool {
        self.brand == d.brand && self.suffix == d.suffix
    }
}

/// Status of one brand's listener, for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandStatus {
    pub brand: Brand,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast: Option<String>,
}

/// Staggered startup: one brand's sockets per poll so IGMP joins do not
/// flood the network at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartupPhase {
    NotStarted,
    NavicoBr24,
    NavicoGen3,
    Raymarine,
    Garmin,
    Complete,
}

struct Listener {
    socket: UdpSocketHandle,
    group: Ipv4Addr,
    port: u16,
}

/// Discovers radars on the local network.
///
/// Pure poll-driven engine over [`IoProvider`]: the driver owns the cadence
/// and the thread, the locator owns the sockets and the slot table.
pub struct Locator {
    navico_br24: Option<Listener>,
    navico_gen3: Option<Listener>,
    raymarine: Option<Listener>,
    garmin: Option<Listener>,

    #[cfg(feature = "raymarine")]
    raymarine_pairer: raymarine::BeaconPairer,

    pub slots: Vec<RadarSlot>,
    status: Vec<BrandStatus>,

    startup_phase: StartupPhase,
    interfaces: Vec<Ipv4Addr>,
    next_probe_ms: u64,
    next_rescan_ms: u64,
}

impl Locator {
    pub fn new() -> Self {
        Self {
            navico_br24: None,
            navico_gen3: None,
            raymarine: None,
            garmin: None,
            #[cfg(feature = "raymarine")]
            raymarine_pairer: raymarine::BeaconPairer::new(),
            slots: Vec::new(),
            status: Vec::new(),
            startup_phase: StartupPhase::NotStarted,
            interfaces: Vec::new(),
            next_probe_ms: 0,
            next_rescan_ms: 0,
        }
    }

    /// Reserve a slot for a known radar ahead of discovery, e.g. from a
    /// persisted session.
    pub fn add_slot(&mut self, brand: Brand, suffix: Option<&str>) -> usize {
        self.slots.push(RadarSlot {
            brand,
            suffix: suffix.map(|s| s.to_string()),
            location: None,
            discovery: None,
            last_seen_ms: 0,
        });
        self.slots.len() - 1
    }

    /// Begin staggered listener initialization.
    pub fn start<I: IoProvider>(&mut self, io: &mut I) {
        self.status.clear();
        self.interfaces = io.interface_addresses();
        self.startup_phase = StartupPhase::NavicoBr24;
        let now = io.current_time_ms();
        self.next_rescan_ms = now + RESCAN_INTERVAL_MS;
        // First probe goes out as soon as startup completes
        self.next_probe_ms = now;
        self.advance_startup(io);
    }

    pub fn is_starting(&self) -> bool {
        self.startup_phase != StartupPhase::Complete
            && self.startup_phase != StartupPhase::NotStarted
    }

    pub fn status(&self) -> &[BrandStatus] {
        &self.status
    }

    /// One poll cycle: finish startup if pending, drain every listener,
    /// send periodic probes, rescan interfaces.
    pub fn poll<I: IoProvider>(&mut self, io: &mut I) -> Vec<LocatorEvent> {
        if self.is_starting() {
            self.advance_startup(io);
        }

        let now = io.current_time_ms();
        if now >= self.next_rescan_ms {
            self.next_rescan_ms = now + RESCAN_INTERVAL_MS;
            self.rescan_interfaces(io);
        }
        if self.startup_phase == StartupPhase::Complete && now >= self.next_probe_ms {
            self.next_probe_ms = now + PROBE_INTERVAL_MS;
            self.send_probes(io);
        }

        let mut events = Vec::new();
        self.drain_navico(io, &mut events);
        self.drain_raymarine(io, &mut events);
        self.drain_garmin(io, &mut events);
        events
    }

    /// Close every socket. The slot table is kept; a restarted locator
    /// re-associates radars by serial.
    pub fn shutdown<I: IoProvider>(&mut self, io: &mut I) {
        for listener in [
            self.navico_br24.take(),
            self.navico_gen3.take(),
            self.raymarine.take(),
            self.garmin.take(),
        ]
        .into_iter()
        .flatten()
        {
            io.udp_close(listener.socket);
        }
        self.startup_phase = StartupPhase::NotStarted;
        self.status.clear();
    }

    // -------------------------------------------------------------------------
    // Slot routing
    // -------------------------------------------------------------------------

    /// Route a parsed announcement into a slot.
    ///
    /// Priority: same serial number, then same report address, then same
    /// origin where neither serial nor report address was ever learned,
    /// then the first empty slot for the role, then override of the first
    /// slot for the role. A brand new role gets a fresh slot.
    pub fn route_discovery(
        &mut self,
        discovery: RadarDiscovery,
        now_ms: u64,
    ) -> Option<LocatorEvent> {
        let index = self
            .find_by_serial(&discovery)
            .or_else(|| self.find_by_report_address(&discovery))
            .or_else(|| self.find_by_bare_origin(&discovery))
            .or_else(|| self.find_free_slot(&discovery))
            .or_else(|| self.find_role_override(&discovery))
            .unwrap_or_else(|| self.add_slot(discovery.brand, discovery.suffix.as_deref()));

        let slot = &mut self.slots[index];
        slot.last_seen_ms = now_ms;
        let newly_filled = slot.location.is_none();
        let changed = match &mut slot.location {
            Some(location) => location.update_from(&discovery),
            None => {
                slot.location = Some(RadarLocationInfo::from_discovery(&discovery));
                true
            }
        };
        if !changed {
            slot.discovery = Some(discovery);
            return None;
        }
        slot.discovery = Some(discovery.clone());
        Some(if newly_filled {
            LocatorEvent::RadarDiscovered {
                slot: index,
                discovery,
            }
        } else {
            LocatorEvent::RadarUpdated {
                slot: index,
                discovery,
            }
        })
    }

    fn find_by_serial(&self, d: &RadarDiscovery) -> Option<usize> {
        let serial = d.serial_number.as_deref()?;
        self.slots.iter().position(|s| {
            s.role_matches(d)
                && s.location
                    .as_ref()
                    .and_then(|l| l.serial_number.as_deref())
                    == Some(serial)
        })
    }

    fn find_by_report_address(&self, d: &RadarDiscovery) -> Option<usize> {
        let report = d.report_address?;
        self.slots.iter().position(|s| {
            s.role_matches(d)
                && s.location.as_ref().and_then(|l| l.report_address) == Some(report)
        })
    }

    fn find_by_bare_origin(&self, d: &RadarDiscovery) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.role_matches(d)
                && s.location.as_ref().map_or(false, |l| {
                    l.origin == d.address
                        && l.serial_number.is_none()
                        && l.report_address.is_none()
                })
        })
    }

    fn find_free_slot(&self, d: &RadarDiscovery) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.role_matches(d) && s.location.is_none())
    }

    fn find_role_override(&self, d: &RadarDiscovery) -> Option<usize> {
        // Only override when the role can never get another slot; a radar
        // with a serial we have not seen yet deserves its own
        if d.serial_number.is_some() {
            return None;
        }
        self.slots.iter().position(|s| s.role_matches(d))
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    fn advance_startup<I: IoProvider>(&mut self, io: &mut I) {
        match self.startup_phase {
            StartupPhase::NotStarted | StartupPhase::Complete => {}
            StartupPhase::NavicoBr24 => {
                #[cfg(feature = "navico")]
                {
                    self.navico_br24 = self.open_listener(
                        io,
                        Brand::Navico,
                        navico::BR24_BEACON_ADDR,
                        navico::BR24_BEACON_PORT,
                    );
                }
                self.startup_phase = StartupPhase::NavicoGen3;
            }
            StartupPhase::NavicoGen3 => {
                #[cfg(feature = "navico")]
                {
                    self.navico_gen3 = self.open_listener(
                        io,
                        Brand::Navico,
                        navico::GEN3_BEACON_ADDR,
                        navico::GEN3_BEACON_PORT,
                    );
                }
                self.startup_phase = StartupPhase::Raymarine;
            }
            StartupPhase::Raymarine => {
                #[cfg(feature = "raymarine")]
                {
                    self.raymarine = self.open_listener(
                        io,
                        Brand::Raymarine,
                        raymarine::BEACON_ADDR,
                        raymarine::BEACON_PORT,
                    );
                }
                self.startup_phase = StartupPhase::Garmin;
            }
            StartupPhase::Garmin => {
                #[cfg(feature = "garmin")]
                {
                    self.garmin = self.open_listener(
                        io,
                        Brand::Garmin,
                        garmin::REPORT_ADDR,
                        garmin::REPORT_PORT,
                    );
                }
                self.startup_phase = StartupPhase::Complete;
                io.info("Radar discovery listeners initialized");
            }
        }
    }

    fn open_listener<I: IoProvider>(
        &mut self,
        io: &mut I,
        brand: Brand,
        group: Ipv4Addr,
        port: u16,
    ) -> Option<Listener> {
        let socket = match io.udp_create() {
            Ok(s) => s,
            Err(e) => {
                self.status.push(BrandStatus {
                    brand,
                    status: format!("Failed to create socket: {}", e),
                    port: None,
                    multicast: None,
                });
                return None;
            }
        };
        if let Err(e) = io.udp_bind(&socket, port) {
            io.udp_close(socket);
            self.status.push(BrandStatus {
                brand,
                status: format!("Failed to bind port {}: {}", port, e),
                port: None,
                multicast: None,
            });
            return None;
        }
        let mut joined = 0;
        for &interface in &self.interfaces {
            match io.udp_join_multicast(&socket, group, interface) {
                Ok(()) => joined += 1,
                Err(e) => io.debug(&format!(
                    "Failed to join {} on {}: {}",
                    group, interface, e
                )),
            }
        }
        self.status.push(BrandStatus {
            brand,
            status: if joined > 0 {
                "Listening".to_string()
            } else {
                "No multicast interface".to_string()
            },
            port: Some(port),
            multicast: Some(group.to_string()),
        });
        Some(Listener {
            socket,
            group,
            port,
        })
    }

    fn rescan_interfaces<I: IoProvider>(&mut self, io: &mut I) {
        let fresh = io.interface_addresses();
        if fresh == self.interfaces {
            return;
        }
        io.info("Interface list changed, re-joining multicast groups");
        self.interfaces = fresh;
        // Re-join on every listener; joining twice on the same interface
        // fails harmlessly with EADDRINUSE
        let listeners: Vec<(UdpSocketHandle, Ipv4Addr)> = [
            self.navico_br24.as_ref(),
            self.navico_gen3.as_ref(),
            self.raymarine.as_ref(),
            self.garmin.as_ref(),
        ]
        .iter()
        .flatten()
        .map(|l| (l.socket, l.group))
        .collect();
        for (socket, group) in listeners {
            for &interface in &self.interfaces {
                let _ = io.udp_join_multicast(&socket, group, interface);
            }
        }
    }

    /// Wake/probe datagrams. Navico scanners stay silent until asked for
    /// their address block; Raymarine scanners only announce to someone who
    /// has identified itself as a display.
    fn send_probes<I: IoProvider>(&mut self, io: &mut I) {
        #[cfg(feature = "navico")]
        {
            if let Some(l) = &self.navico_br24 {
                let dest = SocketAddrV4::new(l.group, l.port);
                let _ = io.udp_send_to(&l.socket, &navico::ADDRESS_REQUEST_PACKET, dest);
            }
            if let Some(l) = &self.navico_gen3 {
                let dest = SocketAddrV4::new(l.group, l.port);
                let _ = io.udp_send_to(&l.socket, &navico::ADDRESS_REQUEST_PACKET, dest);
            }
        }
        #[cfg(feature = "raymarine")]
        if let Some(l) = &self.raymarine {
            let dest = SocketAddrV4::new(l.group, l.port);
            let _ = io.udp_send_to(&l.socket, &raymarine::MFD_PROBE, dest);
        }
    }

    fn drain_navico<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<LocatorEvent>) {
        #[cfg(feature = "navico")]
        {
            let mut buf = [0u8; 1024];
            for socket in [
                self.navico_br24.as_ref().map(|l| l.socket),
                self.navico_gen3.as_ref().map(|l| l.socket),
            ]
            .into_iter()
            .flatten()
            {
                while let Some((len, from)) = io.udp_recv_from(&socket, &mut buf) {
                    match navico::parse_beacon_response(&buf[..len], from) {
                        Ok(discoveries) => {
                            let now = io.current_time_ms();
                            for d in discoveries {
                                events.extend(self.route_discovery(d, now));
                            }
                        }
                        Err(_) => {
                            // Wake requests from other displays share the
                            // group; not every datagram is an announcement
                        }
                    }
                }
            }
        }
        #[cfg(not(feature = "navico"))]
        let _ = (io, events);
    }

    fn drain_raymarine<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<LocatorEvent>) {
        #[cfg(feature = "raymarine")]
        if let Some(l) = &self.raymarine {
            let socket = l.socket;
            let mut buf = [0u8; 1024];
            while let Some((len, from)) = io.udp_recv_from(&socket, &mut buf) {
                let Ok(beacon) = raymarine::parse_beacon(&buf[..len]) else {
                    continue;
                };
                if let Some(d) = self.raymarine_pairer.observe(beacon, from) {
                    let now = io.current_time_ms();
                    events.extend(self.route_discovery(d, now));
                }
            }
        }
        #[cfg(not(feature = "raymarine"))]
        let _ = (io, events);
    }

    fn drain_garmin<I: IoProvider>(&mut self, io: &mut I, events: &mut Vec<LocatorEvent>) {
        #[cfg(feature = "garmin")]
        if let Some(l) = &self.garmin {
            let socket = l.socket;
            let mut buf = [0u8; 1024];
            while let Some((len, from)) = io.udp_recv_from(&socket, &mut buf) {
                // Garmin has no beacon; any well-formed report on the
                // multicast group proves a scanner is there
                if garmin::parse_report(&buf[..len]).is_ok() {
                    let now = io.current_time_ms();
                    let d = garmin::create_discovery(from);
                    events.extend(self.route_discovery(d, now));
                }
            }
        }
        #[cfg(not(feature = "garmin"))]
        let _ = (io, events);
    }
}

impl Default for Locator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(
        serial: Option<&str>,
        origin: SocketAddrV4,
        report: Option<SocketAddrV4>,
    ) -> RadarDiscovery {
        RadarDiscovery {
            brand: Brand::Navico,
            model: None,
            name: "HALO".into(),
            address: origin,
            spokes_per_revolution: 2048,
            max_spoke_len: 1024,
            pixel_values: 16,
            serial_number: serial.map(|s| s.to_string()),
            nic_address: None,
            suffix: None,
            data_address: Some(SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 8), 6678)),
            report_address: report,
            send_address: None,
        }
    }

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, last), port)
    }

    #[test]
    fn test_same_serial_routes_to_same_slot() {
        let mut locator = Locator::new();

        let event = locator.route_discovery(discovery(Some("123"), addr(50, 6878), None), 0);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarDiscovered { slot: 0, .. })
        ));

        // Same radar, new DHCP lease: updates slot 0 instead of creating one
        let event = locator.route_discovery(discovery(Some("123"), addr(99, 6878), None), 5);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarUpdated { slot: 0, .. })
        ));
        assert_eq!(locator.slots.len(), 1);

        // Unchanged announcement produces no event
        let event = locator.route_discovery(discovery(Some("123"), addr(99, 6878), None), 10);
        assert!(event.is_none());
        assert_eq!(locator.slots[0].last_seen_ms, 10);
    }

    #[test]
    fn test_different_serials_get_different_slots() {
        let mut locator = Locator::new();
        locator.route_discovery(discovery(Some("123"), addr(50, 6878), None), 0);
        let event = locator.route_discovery(discovery(Some("456"), addr(51, 6878), None), 0);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarDiscovered { slot: 1, .. })
        ));
        assert_eq!(locator.slots.len(), 2);
    }

    #[test]
    fn test_report_address_match_when_no_serial() {
        let mut locator = Locator::new();
        let report = addr(200, 6679);
        locator.route_discovery(discovery(None, addr(50, 6878), Some(report)), 0);

        // Announcement from another NIC of the same scanner, same report group
        let event = locator.route_discovery(discovery(None, addr(51, 6878), Some(report)), 1);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarUpdated { slot: 0, .. })
        ));
        assert_eq!(locator.slots.len(), 1);
    }

    #[test]
    fn test_preconfigured_slot_is_claimed() {
        let mut locator = Locator::new();
        locator.add_slot(Brand::Navico, None);
        locator.add_slot(Brand::Garmin, None);

        let event = locator.route_discovery(discovery(Some("123"), addr(50, 6878), None), 0);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarDiscovered { slot: 0, .. })
        ));
        assert!(locator.slots[1].location.is_none());
        assert_eq!(locator.slots.len(), 2);
    }

    #[test]
    fn test_dual_channel_suffixes_are_distinct_roles() {
        let mut locator = Locator::new();
        let mut a = discovery(None, addr(50, 6878), None);
        a.suffix = Some("A".into());
        let mut b = discovery(None, addr(50, 6878), None);
        b.suffix = Some("B".into());

        locator.route_discovery(a, 0);
        let event = locator.route_discovery(b, 0);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarDiscovered { slot: 1, .. })
        ));
        assert_eq!(locator.slots.len(), 2);
    }

    #[test]
    fn test_serialless_origin_change_overrides_role() {
        let mut locator = Locator::new();
        locator.route_discovery(discovery(None, addr(50, 6878), None), 0);

        // No serial, no report address, new origin: must override the
        // existing slot for the role rather than grow the table forever
        let event = locator.route_discovery(discovery(None, addr(51, 6878), None), 1);
        assert!(matches!(
            event,
            Some(LocatorEvent::RadarUpdated { slot: 0, .. })
        ));
        assert_eq!(locator.slots.len(), 1);
    }
}
