//! Raymarine (RD/Quantum) receive engine.
//!
//! Both families share one nested container protocol dispatched on a
//! 32-bit message id, so a single engine serves both: RD scanners send
//! multi-spoke container frames, Quantum scanners one compressed spoke
//! per datagram. Spoke geometry depends on the latest status report, so
//! the engine tracks the active scanned range between reports.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use pelorus_core::protocol::raymarine::{self, QuantumStatus, RdStatus, Status};
use pelorus_core::{ControlType, RadarDiscovery, RadarState, Spoke};
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use super::{
    require_addr, EngineAddresses, EngineState, DATA_TIMEOUT, KEEPALIVE_INTERVAL, RADAR_TIMEOUT,
    TICK,
};
use crate::network::{create_multicast_send, create_udp_multicast_listen};
use crate::radar::{RadarError, SharedRadar, SharedRadars};

const BUFFER_SIZE: usize = 4096;

struct Sockets {
    report: UdpSocket,
    data: UdpSocket,
    command: UdpSocket,
}

pub struct RaymarineReceiver {
    key: String,
    radars: SharedRadars,
    radar: SharedRadar,
    nic_addr: Ipv4Addr,
    addrs: EngineAddresses,

    state: EngineState,
    /// Quantum and RD use different keepalives and commands.
    is_quantum: bool,
    max_spoke_len: u16,
    /// Scanned range from the latest status report, meters.
    range_meters: u32,
    /// Spokes seen on even angles only since the last odd angle. An RD
    /// scanner rotating at half resolution never sends an odd angle, so a
    /// full revolution of even angles flips half-resolution duplication on.
    even_angle_streak: u32,
    half_resolution: bool,

    keepalive_counter: u32,
    next_keepalive: Instant,
    last_radar_seen: Instant,
    last_data_seen: Instant,
    epoch: Instant,
    transmit_sent: Option<bool>,
}

impl RaymarineReceiver {
    pub fn new(
        radars: SharedRadars,
        radar: SharedRadar,
        discovery: &RadarDiscovery,
        nic_addr: Ipv4Addr,
    ) -> Self {
        let key = crate::radar::radar_key(discovery);
        let is_quantum =
            discovery.spokes_per_revolution == raymarine::QUANTUM_SPOKES_PER_REVOLUTION;
        let now = Instant::now();
        RaymarineReceiver {
            key,
            radars,
            radar,
            nic_addr,
            addrs: EngineAddresses::from_discovery(discovery),
            state: EngineState::WaitingForReport,
            is_quantum,
            max_spoke_len: discovery.max_spoke_len,
            range_meters: 0,
            even_angle_streak: 0,
            half_resolution: false,
            keepalive_counter: 0,
            next_keepalive: now,
            last_radar_seen: now,
            last_data_seen: now,
            epoch: now,
            transmit_sent: None,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        log::info!(
            "{}: Raymarine {} receive engine starting",
            self.key,
            if self.is_quantum { "Quantum" } else { "RD" }
        );
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
        let mut report_buf = vec![0u8; BUFFER_SIZE];
        let mut data_buf = vec![0u8; BUFFER_SIZE];

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
                    self.process_datagram(&report_buf[..len]);
                }
                r = sockets.data.recv_from(&mut data_buf) => {
                    let (len, _) = r?;
                    self.process_datagram(&data_buf[..len]);
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
            let datagrams = if self.is_quantum {
                raymarine::quantum_keepalive(self.keepalive_counter)
            } else {
                raymarine::rd_keepalive(self.keepalive_counter)
            };
            for datagram in datagrams {
                sockets.command.send(datagram).await?;
            }
            self.keepalive_counter = self.keepalive_counter.wrapping_add(1);

            self.send_pending_commands(sockets).await?;
        }
        Ok(())
    }

    async fn send_pending_commands(&mut self, sockets: &Sockets) -> Result<(), RadarError> {
        let (transmit, pending, ranges) = {
            let info = self.radar.lock().unwrap();
            let pending: Vec<(ControlType, i32, bool)> = info
                .controls
                .iter()
                .filter(|(_, item)| item.desired() != item.value())
                .map(|(t, item)| (*t, item.desired(), item.is_auto()))
                .collect();
            (info.transmit_requested, pending, info.ranges.clone())
        };

        if self.transmit_sent != Some(transmit) {
            log::info!(
                "{}: requesting {}",
                self.key,
                if transmit { "transmit" } else { "standby" }
            );
            let datagrams = if self.is_quantum {
                raymarine::quantum_encode_transmit(transmit)
            } else {
                raymarine::rd_encode_transmit(transmit)
            };
            for datagram in datagrams {
                sockets.command.send(&datagram).await?;
            }
            self.transmit_sent = Some(transmit);
        }

        for (control, desired, auto) in pending {
            let Some(datagrams) = self.command_for(control, desired, auto, &ranges) else {
                continue;
            };
            log::debug!("{}: sending {:?} = {}", self.key, control, desired);
            for datagram in datagrams {
                sockets.command.send(&datagram).await?;
            }
        }
        Ok(())
    }

    fn command_for(
        &self,
        control: ControlType,
        value: i32,
        auto: bool,
        ranges: &[u32],
    ) -> Option<Vec<Vec<u8>>> {
        let value_u8 = value.clamp(0, 255) as u8;
        if self.is_quantum {
            match control {
                ControlType::Range => {
                    let index = closest_range_index(ranges, value.max(0) as u32)?;
                    Some(raymarine::quantum_encode_range_index(index))
                }
                ControlType::Gain => Some(raymarine::quantum_encode_gain(auto, value_u8)),
                ControlType::ColorGain => {
                    Some(raymarine::quantum_encode_color_gain(auto, value_u8))
                }
                ControlType::Sea => Some(raymarine::quantum_encode_sea(auto, value_u8)),
                ControlType::Rain => {
                    Some(raymarine::quantum_encode_rain((value > 0).then_some(value_u8)))
                }
                ControlType::Mode => Some(raymarine::quantum_encode_mode(value_u8)),
                ControlType::TargetExpansion => {
                    Some(raymarine::quantum_encode_target_expansion(value > 0))
                }
                _ => None,
            }
        } else {
            match control {
                ControlType::Range => {
                    let index = closest_range_index(ranges, value.max(0) as u32)?;
                    Some(raymarine::rd_encode_range_index(index))
                }
                ControlType::Gain => Some(raymarine::rd_encode_gain(auto, value_u8)),
                ControlType::Sea => Some(raymarine::rd_encode_sea(auto, value_u8)),
                ControlType::Rain => {
                    Some(raymarine::rd_encode_rain((value > 0).then_some(value_u8)))
                }
                ControlType::Ftc => {
                    Some(raymarine::rd_encode_ftc((value > 0).then_some(value_u8)))
                }
                ControlType::BearingAlignment => {
                    Some(raymarine::rd_encode_bearing_alignment(value))
                }
                ControlType::InterferenceRejection => {
                    Some(raymarine::rd_encode_interference_rejection(value_u8))
                }
                ControlType::TargetExpansion => {
                    Some(raymarine::rd_encode_target_expansion(value_u8))
                }
                ControlType::MainBangSuppression => {
                    Some(raymarine::rd_encode_mbs(value > 0))
                }
                ControlType::DisplayTiming => Some(raymarine::rd_encode_display_timing(value_u8)),
                _ => None,
            }
        }
    }

    /// Dispatch one datagram on its message id. Status and spoke messages
    /// can arrive on either socket depending on the scanner generation.
    fn process_datagram(&mut self, data: &[u8]) {
        let Some(id) = raymarine::message_id(data) else {
            return;
        };
        self.last_radar_seen = Instant::now();
        if self.state == EngineState::WaitingForReport {
            log::info!("{}: report seen, waiting for data", self.key);
            self.state = EngineState::WaitingForData;
        }

        match id {
            raymarine::MESSAGE_QUANTUM_SPOKE => self.process_quantum_spoke(data),
            raymarine::MESSAGE_RD_FRAME => self.process_rd_frame(data),
            raymarine::MESSAGE_QUANTUM_STATUS => match raymarine::parse_quantum_status(data) {
                Ok(status) => self.apply_quantum_status(status),
                Err(e) => self.count_broken("quantum status", e),
            },
            raymarine::MESSAGE_RD_STATUS | raymarine::MESSAGE_RD_STATUS_HD => {
                match raymarine::parse_rd_status(data) {
                    Ok(status) => self.apply_rd_status(status),
                    Err(e) => self.count_broken("status", e),
                }
            }
            raymarine::MESSAGE_RD_SERIAL => match raymarine::parse_rd_serial(data) {
                Ok((interface, module)) => {
                    let mut info = self.radar.lock().unwrap();
                    let firmware = format!("{}/{}", interface, module);
                    if info.firmware.as_deref() != Some(firmware.as_str()) {
                        log::info!("{}: scanner serial {}", self.key, firmware);
                        info.firmware = Some(firmware);
                    }
                }
                Err(e) => self.count_broken("serial", e),
            },
            raymarine::MESSAGE_RD_FIXED => {}
            other => {
                log::trace!("{}: unhandled message {:#010x}", self.key, other);
            }
        }
    }

    fn count_broken(&self, what: &str, e: pelorus_core::ParseError) {
        let mut info = self.radar.lock().unwrap();
        info.processor.statistics.received_packets += 1;
        info.processor.statistics.broken_packets += 1;
        log::debug!("{}: broken {}: {}", self.key, what, e);
    }

    fn mark_data_seen(&mut self) {
        self.last_data_seen = Instant::now();
        if self.state != EngineState::Connected {
            log::info!("{}: spoke data flowing, connected", self.key);
            self.state = EngineState::Connected;
        }
    }

    fn process_quantum_spoke(&mut self, data: &[u8]) {
        self.mark_data_seen();
        let time_ms = self.epoch.elapsed().as_millis() as u64;
        let mut info = self.radar.lock().unwrap();
        info.processor.statistics.received_packets += 1;
        match raymarine::parse_quantum_spoke(data, self.range_meters, time_ms) {
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

    fn process_rd_frame(&mut self, data: &[u8]) {
        self.mark_data_seen();
        let time_ms = self.epoch.elapsed().as_millis() as u64;
        let decoded = {
            let mut info = self.radar.lock().unwrap();
            info.processor.statistics.received_packets += 1;
            match raymarine::parse_rd_frame(
                data,
                self.max_spoke_len as usize,
                self.half_resolution,
                self.range_meters,
                time_ms,
            ) {
                Ok(decoded) => decoded,
                Err(e) => {
                    info.processor.statistics.broken_packets += 1;
                    log::debug!("{}: broken frame: {}", self.key, e);
                    return;
                }
            }
        };

        for spoke in &decoded.spokes {
            if spoke.angle % 2 == 1 {
                if self.half_resolution {
                    log::info!("{}: scanner back to full resolution", self.key);
                    self.half_resolution = false;
                }
                self.even_angle_streak = 0;
            } else if !self.half_resolution {
                self.even_angle_streak += 1;
                let spokes = self.radar.lock().unwrap().spokes_per_revolution as u32;
                if self.even_angle_streak >= spokes / 2 {
                    log::info!("{}: scanner at half resolution, duplicating spokes", self.key);
                    self.half_resolution = true;
                }
            }
        }

        let processed: Vec<Spoke> = {
            let mut info = self.radar.lock().unwrap();
            if decoded.is_hd && info.pixel_values != raymarine::HD_PIXEL_VALUES {
                log::info!("{}: HD samples detected", self.key);
                info.pixel_values = raymarine::HD_PIXEL_VALUES;
            }
            decoded
                .spokes
                .into_iter()
                .map(|spoke| info.processor.process(spoke))
                .collect()
        };
        self.radars.publish_spokes(&self.key, processed);
    }

    fn apply_rd_status(&mut self, status: RdStatus) {
        if let Some(range) = status.scan_range_meters() {
            self.range_meters = range;
        }
        let mut info = self.radar.lock().unwrap();
        info.processor.statistics.received_packets += 1;
        info.ranges = status.ranges.clone();

        if let Some(state) = map_status(status.status) {
            if info.state.observe(state) {
                log::info!("{}: state {}", self.key, state);
            }
        }

        if let Some(&range) = status.ranges.get(status.range_id as usize) {
            info.controls.update(ControlType::Range, range as i32, false);
        }
        info.controls
            .update(ControlType::Gain, status.gain as i32, status.auto_gain);
        info.controls
            .update(ControlType::Sea, status.sea as i32, status.auto_sea != 0);
        info.controls.update(
            ControlType::Rain,
            if status.rain_enabled { status.rain as i32 } else { 0 },
            false,
        );
        info.controls.update(
            ControlType::Ftc,
            if status.ftc_enabled { status.ftc as i32 } else { 0 },
            false,
        );
        info.controls
            .update(ControlType::Tune, status.tune as i32, status.auto_tune);
        info.controls.update(
            ControlType::BearingAlignment,
            status.bearing_offset as i32,
            false,
        );
        info.controls.update(
            ControlType::InterferenceRejection,
            status.interference_rejection as i32,
            false,
        );
        info.controls.update(
            ControlType::TargetExpansion,
            status.target_expansion as i32,
            false,
        );
        info.controls.update(
            ControlType::MainBangSuppression,
            status.mbs_enabled as i32,
            false,
        );
    }

    fn apply_quantum_status(&mut self, status: QuantumStatus) {
        if let Some(range) = status.range_meters() {
            self.range_meters = range;
        }
        let mut info = self.radar.lock().unwrap();
        info.processor.statistics.received_packets += 1;
        info.ranges = status.ranges.clone();

        if let Some(state) = map_status(status.status) {
            if info.state.observe(state) {
                log::info!("{}: state {}", self.key, state);
            }
        }

        if let Some(&range) = status.ranges.get(status.range_index as usize) {
            info.controls.update(ControlType::Range, range as i32, false);
        }
        info.controls
            .update(ControlType::Mode, status.mode as i32, false);

        // The scanner keeps one control block per operating mode; only the
        // active mode's block is the current truth
        let controls = status.controls[status.mode.min(3) as usize];
        info.controls
            .update(ControlType::Gain, controls.gain as i32, controls.gain_auto);
        info.controls.update(
            ControlType::ColorGain,
            controls.color_gain as i32,
            controls.color_gain_auto,
        );
        info.controls
            .update(ControlType::Sea, controls.sea as i32, controls.sea_auto);
        info.controls.update(
            ControlType::Rain,
            if controls.rain_enabled { controls.rain as i32 } else { 0 },
            false,
        );
        info.controls.update(
            ControlType::BearingAlignment,
            status.bearing_offset as i32,
            false,
        );
        info.controls.update(
            ControlType::InterferenceRejection,
            status.interference_rejection as i32,
            false,
        );
        info.controls.update(
            ControlType::TargetExpansion,
            status.target_expansion as i32,
            false,
        );
        info.controls.update(
            ControlType::MainBangSuppression,
            status.mbs_enabled as i32,
            false,
        );
    }

    fn on_radar_lost(&mut self) {
        self.state = EngineState::WaitingForReport;
        self.transmit_sent = None;
        self.even_angle_streak = 0;
        let mut info = self.radar.lock().unwrap();
        info.state.reset();
        info.processor.reset();
    }
}

fn map_status(status: Option<Status>) -> Option<RadarState> {
    Some(match status? {
        Status::Standby => RadarState::Standby,
        Status::Transmit => RadarState::Transmit,
        Status::WarmingUp => RadarState::WarmingUp,
        Status::Off | Status::ShuttingDown => RadarState::Off,
    })
}

/// Index of the smallest table range covering the requested meters, or
/// the largest range if the request exceeds the table.
fn closest_range_index(ranges: &[u32], meters: u32) -> Option<u8> {
    if ranges.is_empty() {
        return None;
    }
    let index = ranges
        .iter()
        .position(|&r| r >= meters)
        .unwrap_or(ranges.len() - 1);
    Some(index as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_range_index() {
        let ranges = [463, 926, 1852, 3704];
        assert_eq!(closest_range_index(&ranges, 463), Some(0));
        assert_eq!(closest_range_index(&ranges, 1000), Some(2));
        assert_eq!(closest_range_index(&ranges, 99999), Some(3));
        assert_eq!(closest_range_index(&[], 500), None);
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status(None), None);
        assert_eq!(map_status(Some(Status::Transmit)), Some(RadarState::Transmit));
        assert_eq!(map_status(Some(Status::ShuttingDown)), Some(RadarState::Off));
    }
}
