//! Navico (BR24/3G/4G/HALO) receive engine.
//!
//! The report channel carries control and status reports, the data channel
//! carries framed spoke lines with 32 spokes per datagram. The scanner only
//! keeps multicasting while someone sends the stay-alive datagrams, so the
//! engine doubles as the keepalive source.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pelorus_core::protocol::navico::{
    self, DopplerMode, Model, PixelLookup, Report, Status,
};
use pelorus_core::{ControlType, ParseError, RadarDiscovery, RadarState, Spoke};
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use super::{
    require_addr, EngineAddresses, EngineState, DATA_TIMEOUT, KEEPALIVE_INTERVAL, RADAR_TIMEOUT,
    TICK,
};
use crate::network::{create_multicast_send, create_udp_multicast_listen};
use crate::radar::{RadarError, SharedRadar, SharedRadars};

/// One data-channel datagram: frame header plus up to 32 spoke lines.
const FRAME_BUFFER_SIZE: usize =
    navico::FRAME_HEADER_SIZE + navico::SPOKES_PER_FRAME * navico::LINE_SIZE;

const REPORT_BUFFER_SIZE: usize = 1024;

/// Palette indices substituted for Doppler-marked samples.
const DOPPLER_APPROACHING: u8 = 255;
const DOPPLER_RECEDING: u8 = 254;

struct Sockets {
    report: UdpSocket,
    data: UdpSocket,
    command: UdpSocket,
}

pub struct NavicoReceiver {
    key: String,
    radars: SharedRadars,
    radar: SharedRadar,
    nic_addr: Ipv4Addr,
    addrs: EngineAddresses,

    state: EngineState,
    model: Model,
    doppler: DopplerMode,
    lookup: PixelLookup,

    keepalive_counter: u64,
    next_keepalive: Instant,
    last_radar_seen: Instant,
    last_data_seen: Instant,
    epoch: Instant,

    /// Last transmit on/off actually sent, to avoid re-arming every tick.
    transmit_sent: Option<bool>,
    /// Last desired value sent per control, same reason.
    sent_desired: HashMap<ControlType, i32>,
}

impl NavicoReceiver {
    pub fn new(
        radars: SharedRadars,
        radar: SharedRadar,
        discovery: &RadarDiscovery,
        nic_addr: Ipv4Addr,
    ) -> Self {
        let key = crate::radar::radar_key(discovery);
        let model = discovery
            .model
            .as_deref()
            .map(Model::from_name)
            .unwrap_or(Model::Unknown);
        let now = Instant::now();
        NavicoReceiver {
            key,
            radars,
            radar,
            nic_addr,
            addrs: EngineAddresses::from_discovery(discovery),
            state: EngineState::WaitingForReport,
            model,
            doppler: DopplerMode::None,
            lookup: PixelLookup::new(DOPPLER_APPROACHING, DOPPLER_RECEDING),
            keepalive_counter: 0,
            next_keepalive: now,
            last_radar_seen: now,
            last_data_seen: now,
            epoch: now,
            transmit_sent: None,
            sent_desired: HashMap::new(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        log::info!("{}: Navico receive engine starting", self.key);
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
                Err(RadarError::Shutdown) => {
                    log::debug!("{}: shutdown", self.key);
                    return Ok(());
                }
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
            // Sockets drop here; fresh ones next iteration
        }
    }

    /// Open the three sockets in fixed order: report, data, command.
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
        let mut data_buf = vec![0u8; FRAME_BUFFER_SIZE];

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
                    self.process_frame(&data_buf[..len]);
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

        if now >= self.next_keepalive {
            self.next_keepalive = now + KEEPALIVE_INTERVAL;
            for datagram in navico::keepalive_datagrams(self.keepalive_counter) {
                sockets.command.send(datagram).await?;
            }
            self.keepalive_counter = self.keepalive_counter.wrapping_add(1);
        }

        self.send_pending_commands(sockets).await
    }

    /// Translate operator intent (transmit flag, desired control values)
    /// into command datagrams.
    async fn send_pending_commands(&mut self, sockets: &Sockets) -> Result<(), RadarError> {
        let (transmit, pending) = {
            let info = self.radar.lock().unwrap();
            let pending: Vec<(ControlType, i32, bool)> = info
                .controls
                .iter()
                .filter(|(t, item)| {
                    item.desired() != item.value()
                        && self.sent_desired.get(t) != Some(&item.desired())
                })
                .map(|(t, item)| (*t, item.desired(), item.is_auto()))
                .collect();
            (info.transmit_requested, pending)
        };

        if self.transmit_sent != Some(transmit) {
            log::info!("{}: requesting {}", self.key, if transmit { "transmit" } else { "standby" });
            for datagram in navico::encode_transmit(transmit) {
                sockets.command.send(&datagram).await?;
            }
            self.transmit_sent = Some(transmit);
        }

        for (control, desired, auto) in pending {
            if let Some(datagrams) = command_for(control, desired, auto) {
                log::debug!("{}: sending {:?} = {}", self.key, control, desired);
                for datagram in datagrams {
                    sockets.command.send(&datagram).await?;
                }
                self.sent_desired.insert(control, desired);
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
            match navico::parse_report(data) {
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
            Report::Status(status) => {
                let state = match status {
                    Status::Off => RadarState::Off,
                    Status::Standby => RadarState::Standby,
                    Status::Preparing => RadarState::WarmingUp,
                    Status::Transmit => RadarState::Transmit,
                };
                if info.state.observe(state) {
                    log::info!("{}: state {}", self.key, state);
                }
            }
            Report::Controls(c) => {
                info.controls
                    .update(ControlType::Range, c.range_dm / 10, false);
                info.controls.update(ControlType::Mode, c.mode as i32, false);
                info.controls.update(
                    ControlType::Gain,
                    navico::raw_to_percent(c.gain) as i32,
                    c.gain_auto,
                );
                info.controls
                    .update(ControlType::Sea, c.sea, c.sea_auto != 0);
                info.controls.update(
                    ControlType::Rain,
                    navico::raw_to_percent(c.rain) as i32,
                    false,
                );
                info.controls.update(
                    ControlType::InterferenceRejection,
                    c.interference_rejection as i32,
                    false,
                );
                info.controls.update(
                    ControlType::TargetExpansion,
                    c.target_expansion as i32,
                    false,
                );
                info.controls
                    .update(ControlType::TargetBoost, c.target_boost as i32, false);
            }
            Report::Model(m) => {
                if m.model != self.model {
                    log::info!("{}: model identified as {}", self.key, m.model.as_str());
                    self.model = m.model;
                    info.model = Some(m.model.as_str().to_string());
                }
                info.firmware = Some(format!("{} {}", m.firmware_date, m.firmware_time));
            }
            Report::Installation(i) => {
                info.controls.update(
                    ControlType::BearingAlignment,
                    i.bearing_alignment_decideg as i32,
                    false,
                );
                info.controls.update(
                    ControlType::AntennaHeight,
                    i.antenna_height_mm as i32,
                    false,
                );
            }
            Report::Blanking(b) => {
                if let Some(name) = b.name {
                    log::debug!("{}: radar reports name {:?}", self.key, name);
                }
            }
            Report::Advanced(a) => {
                info.controls
                    .update(ControlType::SeaState, a.sea_state as i32, false);
                info.controls.update(
                    ControlType::LocalInterferenceRejection,
                    a.local_interference_rejection as i32,
                    false,
                );
                info.controls
                    .update(ControlType::ScanSpeed, a.scan_speed as i32, false);
                info.controls.update(
                    ControlType::SideLobeSuppression,
                    navico::raw_to_percent(a.sidelobe_suppression) as i32,
                    a.sidelobe_suppression_auto,
                );
                info.controls.update(
                    ControlType::NoiseRejection,
                    a.noise_rejection as i32,
                    false,
                );
                info.controls.update(
                    ControlType::TargetSeparation,
                    a.target_separation as i32,
                    false,
                );
                if let Some(doppler) = a.doppler_state.and_then(DopplerMode::from_byte) {
                    if doppler != self.doppler {
                        log::info!("{}: Doppler mode {:?}", self.key, doppler);
                        self.doppler = doppler;
                    }
                    info.controls.update(
                        ControlType::DopplerMode,
                        a.doppler_state.unwrap_or(0) as i32,
                        false,
                    );
                }
            }
        }
    }

    fn process_frame(&mut self, data: &[u8]) {
        let now = Instant::now();
        self.last_radar_seen = now;
        self.last_data_seen = now;
        if self.state != EngineState::Connected {
            log::info!("{}: spoke data flowing, connected", self.key);
            self.state = EngineState::Connected;
        }

        let time_ms = self.epoch.elapsed().as_millis() as u64;
        let decoded = match navico::parse_frame(data, &self.lookup, self.doppler, time_ms) {
            Ok(decoded) => decoded,
            Err(e) => {
                let mut info = self.radar.lock().unwrap();
                info.processor.statistics.received_packets += 1;
                info.processor.statistics.broken_packets += 1;
                log::debug!("{}: broken frame: {}", self.key, e);
                return;
            }
        };

        let processed: Vec<Spoke> = {
            let mut info = self.radar.lock().unwrap();
            info.processor.statistics.received_packets += 1;
            info.processor.statistics.broken_packets += decoded.broken_lines as u64;
            decoded
                .spokes
                .into_iter()
                .map(|spoke| info.processor.process(spoke))
                .collect()
        };
        self.radars.publish_spokes(&self.key, processed);
    }

    fn on_radar_lost(&mut self) {
        self.state = EngineState::WaitingForReport;
        self.transmit_sent = None;
        self.sent_desired.clear();
        let mut info = self.radar.lock().unwrap();
        info.state.reset();
        info.processor.reset();
    }
}

/// Command datagrams for one desired control value. Controls the scanner
/// has no command for yield None.
fn command_for(control: ControlType, value: i32, auto: bool) -> Option<Vec<Vec<u8>>> {
    let datagrams = match control {
        ControlType::Range => vec![navico::encode_range(value * 10)],
        ControlType::Gain => vec![navico::encode_gain(
            navico::percent_to_raw(value.clamp(0, 100) as u8),
            auto,
        )],
        ControlType::Sea => vec![navico::encode_sea(
            navico::percent_to_raw(value.clamp(0, 100) as u8),
            auto as u8,
        )],
        ControlType::Rain => vec![navico::encode_rain(navico::percent_to_raw(
            value.clamp(0, 100) as u8,
        ))],
        ControlType::Mode => vec![navico::encode_mode(value as u8)],
        ControlType::InterferenceRejection => {
            vec![navico::encode_interference_rejection(value as u8)]
        }
        ControlType::LocalInterferenceRejection => {
            vec![navico::encode_local_interference_rejection(value as u8)]
        }
        ControlType::TargetExpansion => vec![navico::encode_target_expansion(value as u8)],
        ControlType::TargetBoost => vec![navico::encode_target_boost(value as u8)],
        ControlType::TargetSeparation => vec![navico::encode_target_separation(value as u8)],
        ControlType::NoiseRejection => vec![navico::encode_noise_rejection(value as u8)],
        ControlType::ScanSpeed => vec![navico::encode_scan_speed(value as u8)],
        ControlType::BearingAlignment => {
            vec![navico::encode_bearing_alignment(value.rem_euclid(3600) as u16)]
        }
        ControlType::AntennaHeight => vec![navico::encode_antenna_height(value.max(0) as u32)],
        ControlType::DopplerMode => {
            let mode = DopplerMode::from_byte(value as u8)?;
            vec![navico::encode_doppler(mode)]
        }
        _ => return None,
    };
    Some(datagrams)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_for_range_is_decimeters() {
        let datagrams = command_for(ControlType::Range, 1852, false).unwrap();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(&datagrams[0][..2], &[0x03, 0xc1]);
        assert_eq!(&datagrams[0][2..6], &18520i32.to_le_bytes());
    }

    #[test]
    fn test_command_for_unsupported_control() {
        assert!(command_for(ControlType::Ftc, 50, false).is_none());
        assert!(command_for(ControlType::ColorGain, 50, false).is_none());
    }

    #[test]
    fn test_gain_command_round_trips_percent() {
        let datagrams = command_for(ControlType::Gain, 78, true).unwrap();
        let raw = *datagrams[0].last().unwrap();
        assert_eq!(navico::raw_to_percent(raw), 78);
    }
}
