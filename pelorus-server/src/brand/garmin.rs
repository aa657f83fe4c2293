//! Garmin xHD receive engine.
//!
//! Unlike the framed Navico protocol, each data-channel datagram carries
//! exactly one spoke, and every report datagram carries one key/value
//! record. Report and data share the same multicast group on adjacent
//! ports; commands go unicast to the scanner.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pelorus_core::protocol::garmin::{self, AutoGainLevel, Report, ScannerStatus, SeaMode};
use pelorus_core::{ControlType, ParseError, RadarDiscovery, RadarState};
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use super::{
    require_addr, EngineAddresses, EngineState, DATA_TIMEOUT, KEEPALIVE_INTERVAL, RADAR_TIMEOUT,
    TICK,
};
use crate::network::{create_multicast_send, create_udp_multicast_listen};
use crate::radar::{RadarError, SharedRadar, SharedRadars};

const SPOKE_BUFFER_SIZE: usize = 1500;
const REPORT_BUFFER_SIZE: usize = 1024;

struct Sockets {
    report: UdpSocket,
    data: UdpSocket,
    command: UdpSocket,
}

pub struct GarminReceiver {
    key: String,
    radars: SharedRadars,
    radar: SharedRadar,
    nic_addr: Ipv4Addr,
    addrs: EngineAddresses,

    state: EngineState,
    /// Auto-gain mode carried separately from the gain value on the wire.
    gain_auto: bool,
    last_radar_seen: Instant,
    last_data_seen: Instant,
    next_keepalive: Instant,
    epoch: Instant,
    transmit_sent: Option<bool>,
}

impl GarminReceiver {
    pub fn new(
        radars: SharedRadars,
        radar: SharedRadar,
        discovery: &RadarDiscovery,
        nic_addr: Ipv4Addr,
    ) -> Self {
        let key = crate::radar::radar_key(discovery);
        let now = Instant::now();
        GarminReceiver {
            key,
            radars,
            radar,
            nic_addr,
            addrs: EngineAddresses::from_discovery(discovery),
            state: EngineState::WaitingForReport,
            gain_auto: false,
            last_radar_seen: now,
            last_data_seen: now,
            next_keepalive: now,
            epoch: now,
            transmit_sent: None,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        log::info!("{}: Garmin receive engine starting", self.key);
        loop {
            let sockets = match self.start_sockets().await {
                Ok(s) => s,
                Err(e) => {
                    self.state = EngineState::NoInterface;
                    log::warn!("{}: socket setup failed: {}, retrying", self.key, e);
                    tokio::select! {
                        _ = subsys.on_shutdown_requested() => return Ok(()),
                        _ = sleep(Duration::from_secs(5)) => continue,
                    }
                }
            };

            self.state = EngineState::WaitingForReport;
            let now = Instant::now();
            self.last_radar_seen = now;
            self.last_data_seen = now;

            match self.socket_loop(&subsys, &sockets).await {
                Err(RadarError::Shutdown) => return Ok(()),
                Err(RadarError::Timeout) => {
                    log::warn!("{}: radar not seen for {:?}, reopening", self.key, RADAR_TIMEOUT);
                    self.on_radar_lost();
                }
                Err(e) => {
                    log::warn!("{}: receive error: {}", self.key, e);
                    self.on_radar_lost();
                    tokio::select! {
                        _ = subsys.on_shutdown_requested() => return Ok(()),
                        _ = sleep(Duration::from_secs(1)) => {}
                    }
                }
                Ok(()) => return Ok(()),
            }
        }
    }

    async fn start_sockets(&mut self) -> Result<Sockets, RadarError> {
        let report_addr = require_addr(self.addrs.report, "report", &self.key)?;
        let data_addr = require_addr(self.addrs.data, "data", &self.key)?;
        let send_addr = require_addr(self.addrs.send, "send", &self.key)?;

        let report = create_udp_multicast_listen(&report_addr, &self.nic_addr)?;
        let data = create_udp_multicast_listen(&data_addr, &self.nic_addr)?;
        let command = create_multicast_send(&send_addr, &self.nic_addr)?;
        log::debug!(
            "{} via {}: listening report {} data {} command {}",
            self.key,
            self.nic_addr,
            report_addr,
            data_addr,
            send_addr
        );
        Ok(Sockets {
            report,
            data,
            command,
        })
    }

    async fn socket_loop(
        &mut self,
        subsys: &SubsystemHandle,
        sockets: &Sockets,
    ) -> Result<(), RadarError> {
        let mut report_buf = vec![0u8; REPORT_BUFFER_SIZE];
        let mut data_buf = vec![0u8; SPOKE_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Err(RadarError::Shutdown);
                }
                _ = sleep(TICK) => {
                    self.tick(sockets).await?;
                }
                r = sockets.report.recv_from(&mut report_buf) => {
                    let (len, _) = r?;
                    self.process_report(&report_buf[..len]);
                }
                r = sockets.data.recv_from(&mut data_buf) => {
                    let (len, _) = r?;
                    self.process_spoke(&data_buf[..len]);
                }
            }
        }
    }

    async fn tick(&mut self, sockets: &Sockets) -> Result<(), RadarError> {
        let now = Instant::now();
        if now.duration_since(self.last_radar_seen) > RADAR_TIMEOUT {
            return Err(RadarError::Timeout);
        }
        if self.state == EngineState::Connected
            && now.duration_since(self.last_data_seen) > DATA_TIMEOUT
        {
            log::info!("{}: spoke data stopped, waiting for data", self.key);
            self.state = EngineState::WaitingForData;
        }

        // The scanner multicasts unprompted, so "keepalive" here is only
        // re-asserting the operator's transmit wish.
        if now >= self.next_keepalive {
            self.next_keepalive = now + KEEPALIVE_INTERVAL;
            let transmit = self.radar.lock().unwrap().transmit_requested;
            if self.transmit_sent != Some(transmit) {
                log::info!(
                    "{}: requesting {}",
                    self.key,
                    if transmit { "transmit" } else { "standby" }
                );
                sockets.command.send(&garmin::encode_transmit(transmit)).await?;
                self.transmit_sent = Some(transmit);
            }
            self.send_pending_commands(sockets).await?;
        }
        Ok(())
    }

    async fn send_pending_commands(&mut self, sockets: &Sockets) -> Result<(), RadarError> {
        let pending: Vec<(ControlType, i32, bool)> = {
            let info = self.radar.lock().unwrap();
            info.controls
                .iter()
                .filter(|(_, item)| item.desired() != item.value())
                .map(|(t, item)| (*t, item.desired(), item.is_auto()))
                .collect()
        };

        for (control, desired, auto) in pending {
            let datagrams: Vec<Vec<u8>> = match control {
                ControlType::Range => vec![garmin::encode_range(desired.max(0) as u32)],
                ControlType::Gain => {
                    let auto = auto.then_some(AutoGainLevel::High);
                    garmin::encode_gain(auto, desired.clamp(0, 100) as u16)
                }
                ControlType::Sea => {
                    let mode = if auto {
                        SeaMode::Auto(desired.clamp(0, 2) as u8)
                    } else if desired == 0 {
                        SeaMode::Off
                    } else {
                        SeaMode::Manual(desired.clamp(0, 100) as u16)
                    };
                    garmin::encode_sea(mode)
                }
                ControlType::Rain => {
                    let percent = (desired > 0).then_some(desired.clamp(0, 100) as u16);
                    garmin::encode_rain(percent)
                }
                ControlType::InterferenceRejection => {
                    garmin::encode_interference_rejection(desired.clamp(0, 3) as u8)
                }
                ControlType::BearingAlignment => {
                    vec![garmin::encode_bearing_alignment(desired as f32 / 10.0)]
                }
                ControlType::ScanSpeed => {
                    vec![garmin::encode_dome_speed(desired.clamp(0, 2) as u8)]
                }
                _ => continue,
            };
            log::debug!("{}: sending {:?} = {}", self.key, control, desired);
            for datagram in datagrams {
                sockets.command.send(&datagram).await?;
            }
        }
        Ok(())
    }

    fn process_report(&mut self, data: &[u8]) {
        self.last_radar_seen = Instant::now();
        if self.state == EngineState::WaitingForReport {
            log::info!("{}: report seen, waiting for data", self.key);
            self.state = EngineState::WaitingForData;
        }

        let report = {
            let mut info = self.radar.lock().unwrap();
            info.processor.statistics.received_packets += 1;
            match garmin::parse_report(data) {
                Ok(report) => report,
                Err(ParseError::UnknownPacketType(t)) => {
                    log::trace!("{}: unknown report type {:#x}", self.key, t);
                    return;
                }
                Err(e) => {
                    info.processor.statistics.broken_packets += 1;
                    log::debug!("{}: broken report: {}", self.key, e);
                    return;
                }
            }
        };
        self.apply_report(report);
    }

    fn apply_report(&mut self, report: Report) {
        let mut info = self.radar.lock().unwrap();
        match report {
            Report::ScannerStatus(status) => {
                let state = match status {
                    ScannerStatus::WarmingUp => RadarState::WarmingUp,
                    ScannerStatus::Standby => RadarState::Standby,
                    ScannerStatus::SpinningUp => RadarState::WakingUp,
                    ScannerStatus::Transmit => RadarState::Transmit,
                    ScannerStatus::Unknown(v) => {
                        log::debug!("{}: unknown scanner status {}", self.key, v);
                        return;
                    }
                };
                if info.state.observe(state) {
                    log::info!("{}: state {}", self.key, state);
                }
            }
            Report::Gain(v) => {
                let percent = (v / 100) as i32;
                info.controls
                    .update(ControlType::Gain, percent, self.gain_auto);
            }
            Report::AutoGainMode(auto) => {
                self.gain_auto = auto;
                let value = info
                    .controls
                    .get(ControlType::Gain)
                    .map(|item| item.value())
                    .unwrap_or(0);
                info.controls.update(ControlType::Gain, value, auto);
            }
            Report::AutoGainLevel(level) => {
                log::debug!("{}: auto gain level {:?}", self.key, level);
            }
            Report::Range(meters) => {
                info.controls
                    .update(ControlType::Range, meters as i32, false);
            }
            Report::BearingAlignment(degrees) => {
                info.controls.update(
                    ControlType::BearingAlignment,
                    (degrees * 10.0) as i32,
                    false,
                );
            }
            Report::CrosstalkRejection(v) => {
                info.controls
                    .update(ControlType::InterferenceRejection, v as i32, false);
            }
            Report::RainMode(mode) => {
                if mode == 0 {
                    info.controls.update(ControlType::Rain, 0, false);
                }
            }
            Report::RainLevel(v) => {
                info.controls
                    .update(ControlType::Rain, (v / 100) as i32, false);
            }
            Report::SeaMode(mode) => {
                if mode == 0 {
                    info.controls.update(ControlType::Sea, 0, false);
                }
            }
            Report::SeaLevel(v) => {
                info.controls
                    .update(ControlType::Sea, (v / 100) as i32, false);
            }
            Report::SeaAutoLevel(v) => {
                let value = info
                    .controls
                    .get(ControlType::Sea)
                    .map(|item| item.value())
                    .unwrap_or(0);
                info.controls.update(ControlType::Sea, value, v > 0);
            }
            Report::NoTransmitZoneMode(_mode) => {}
            Report::NoTransmitZoneStart(degrees) => {
                info.controls.update(
                    ControlType::NoTransmitStart,
                    (degrees * 10.0) as i32,
                    false,
                );
            }
            Report::NoTransmitZoneEnd(degrees) => {
                info.controls
                    .update(ControlType::NoTransmitEnd, (degrees * 10.0) as i32, false);
            }
            Report::DomeSpeed(v) => {
                info.controls
                    .update(ControlType::ScanSpeed, (v / 2) as i32, false);
            }
            Report::ScannerMessage(text) => {
                if info.firmware.as_deref() != Some(text.as_str()) {
                    log::info!("{}: scanner reports: {}", self.key, text);
                    info.firmware = Some(text);
                }
            }
            Report::StatusChangeMs(ms) => {
                log::debug!("{}: status change in {} ms", self.key, ms);
            }
            Report::TransmitRequest(_)
            | Report::TimedIdleMode(_)
            | Report::TimedIdleMinutes(_)
            | Report::TimedRunMinutes(_) => {}
            Report::Unknown { packet_type, value } => {
                log::trace!(
                    "{}: unhandled report {:#06x} = {}",
                    self.key,
                    packet_type,
                    value
                );
            }
        }
    }

    fn process_spoke(&mut self, data: &[u8]) {
        let now = Instant::now();
        self.last_radar_seen = now;
        self.last_data_seen = now;
        if self.state != EngineState::Connected {
            log::info!("{}: spoke data flowing, connected", self.key);
            self.state = EngineState::Connected;
        }

        let time_ms = self.epoch.elapsed().as_millis() as u64;
        let mut info = self.radar.lock().unwrap();
        info.processor.statistics.received_packets += 1;
        match garmin::parse_spoke(data, time_ms) {
            Ok(decoded) => {
                let processed = info.processor.process(decoded.spoke);
                drop(info);
                self.radars.publish_spokes(&self.key, vec![processed]);
            }
            Err(e) => {
                info.processor.statistics.broken_packets += 1;
                log::debug!("{}: broken spoke: {}", self.key, e);
            }
        }
    }

    fn on_radar_lost(&mut self) {
        self.state = EngineState::WaitingForReport;
        self.transmit_sent = None;
        let mut info = self.radar.lock().unwrap();
        info.state.reset();
        info.processor.reset();
    }
}
