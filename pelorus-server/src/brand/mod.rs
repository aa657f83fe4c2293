//! Per-brand receive engines.
//!
//! Every radar gets one engine subsystem that owns its sockets and walks
//! the same connection ladder: no interface, waiting for a report, waiting
//! for spoke data, connected. Falling off the ladder closes every socket
//! and starts over; the shared radar state is reset so stale readings do
//! not linger.

use std::net::SocketAddrV4;
use std::time::Duration;

use pelorus_core::RadarDiscovery;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::radar::{radar_key, RadarError, SharedRadar, SharedRadars};

#[cfg(feature = "emulator")]
pub mod emulator;
#[cfg(feature = "garmin")]
pub mod garmin;
#[cfg(feature = "navico")]
pub mod navico;
#[cfg(feature = "raymarine")]
pub mod raymarine;

/// How long without any report datagram before the radar is declared lost.
pub(crate) const RADAR_TIMEOUT: Duration = Duration::from_secs(15);

/// How long without spoke data before the engine regresses to waiting for
/// data. Shorter than [`RADAR_TIMEOUT`]: a radar in standby keeps reporting
/// but sends no spokes.
pub(crate) const DATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Multiplexed wait per loop iteration; bounds shutdown latency.
pub(crate) const TICK: Duration = Duration::from_millis(250);

/// Keepalive transmission cadence.
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Connection ladder for one receive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineState {
    NoInterface,
    WaitingForReport,
    WaitingForData,
    Connected,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::NoInterface => "no interface",
            EngineState::WaitingForReport => "waiting for report",
            EngineState::WaitingForData => "waiting for data",
            EngineState::Connected => "connected",
        };
        write!(f, "{}", s)
    }
}

/// The three addresses an engine needs, pulled out of a discovery. Not
/// every brand announces all of them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineAddresses {
    pub report: Option<SocketAddrV4>,
    pub data: Option<SocketAddrV4>,
    pub send: Option<SocketAddrV4>,
}

impl EngineAddresses {
    pub fn from_discovery(d: &RadarDiscovery) -> Self {
        Self {
            report: d.report_address,
            data: d.data_address,
            send: d.send_address,
        }
    }
}

/// Start the receive engine subsystem for a newly located radar.
pub fn start_receive_engine(
    radars: SharedRadars,
    radar: SharedRadar,
    discovery: RadarDiscovery,
    nic_addr: std::net::Ipv4Addr,
    subsys: &SubsystemHandle,
) {
    let key = radar_key(&discovery);
    log::debug!("Starting {} receive engine for {}", discovery.brand, key);

    match discovery.brand {
        #[cfg(feature = "navico")]
        pelorus_core::Brand::Navico => {
            let engine =
                navico::NavicoReceiver::new(radars, radar, &discovery, nic_addr);
            subsys.start(SubsystemBuilder::new(key, |s| engine.run(s)));
        }
        #[cfg(feature = "garmin")]
        pelorus_core::Brand::Garmin => {
            let engine =
                garmin::GarminReceiver::new(radars, radar, &discovery, nic_addr);
            subsys.start(SubsystemBuilder::new(key, |s| engine.run(s)));
        }
        #[cfg(feature = "raymarine")]
        pelorus_core::Brand::Raymarine => {
            let engine =
                raymarine::RaymarineReceiver::new(radars, radar, &discovery, nic_addr);
            subsys.start(SubsystemBuilder::new(key, |s| engine.run(s)));
        }
        #[cfg(feature = "emulator")]
        pelorus_core::Brand::Emulator => {
            let engine = emulator::EmulatorReceiver::new(radars, radar, &discovery);
            subsys.start(SubsystemBuilder::new(key, |s| engine.run(s)));
        }
        #[allow(unreachable_patterns)]
        other => {
            log::warn!("No receive engine available for {} radar {}", other, key);
        }
    }
}

/// Missing-address guard shared by the engines.
pub(crate) fn require_addr(
    addr: Option<SocketAddrV4>,
    what: &str,
    key: &str,
) -> Result<SocketAddrV4, RadarError> {
    addr.ok_or_else(|| {
        log::error!("{}: no {} address in discovery", key, what);
        RadarError::NoInterface
    })
}
