//! Emulated radar engine.
//!
//! Drives the synthetic spoke source on a timer instead of sockets, so the
//! full pipeline (processing, guard zones, trails, spoke stream) can run
//! without hardware on the network.

use std::time::{Duration, Instant};

use pelorus_core::emulator::Emulator;
use pelorus_core::{ControlType, RadarDiscovery, RadarState, Spoke};
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::radar::{RadarError, SharedRadar, SharedRadars};

/// Polling cadence; at 24 RPM this is ~40 spokes per poll.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct EmulatorReceiver {
    key: String,
    radars: SharedRadars,
    radar: SharedRadar,
    emulator: Emulator,
    epoch: Instant,
}

impl EmulatorReceiver {
    pub fn new(
        radars: SharedRadars,
        radar: SharedRadar,
        discovery: &RadarDiscovery,
    ) -> Self {
        EmulatorReceiver {
            key: crate::radar::radar_key(discovery),
            radars,
            radar,
            emulator: Emulator::new(0),
            epoch: Instant::now(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        log::info!("{}: emulator engine starting", self.key);
        {
            // An emulated scanner powers up transmitting
            let mut info = self.radar.lock().unwrap();
            info.transmit_requested = true;
            info.state.observe(RadarState::Standby);
            info.state.observe(RadarState::Transmit);
            info.controls.update(
                ControlType::Range,
                self.emulator.range() as i32,
                false,
            );
        }

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("{}: shutdown", self.key);
                    return Ok(());
                }
                _ = sleep(POLL_INTERVAL) => {
                    self.poll();
                }
            }
        }
    }

    fn poll(&mut self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;

        let (transmit, desired_range) = {
            let info = self.radar.lock().unwrap();
            let desired = info
                .controls
                .get(ControlType::Range)
                .map(|item| item.desired())
                .filter(|&d| d > 0 && d as u32 != self.emulator.range());
            (info.transmit_requested, desired)
        };

        if let Some(range) = desired_range {
            log::info!("{}: range set to {} m", self.key, range);
            self.emulator.set_range(range as u32);
            let mut info = self.radar.lock().unwrap();
            info.controls.update(ControlType::Range, range, false);
        }

        if !transmit {
            let mut info = self.radar.lock().unwrap();
            if info.state.state().is_transmitting() {
                log::info!("{}: standing by", self.key);
                info.state.observe(RadarState::Standby);
            }
            // Poll anyway to discard the elapsed interval
            let _ = self.emulator.poll(now_ms);
            return;
        }

        let spokes = self.emulator.poll(now_ms);
        if spokes.is_empty() {
            return;
        }

        let processed: Vec<Spoke> = {
            let mut info = self.radar.lock().unwrap();
            if !info.state.state().is_transmitting() {
                info.state.observe(RadarState::Transmit);
            }
            spokes
                .into_iter()
                .map(|spoke| info.processor.process(spoke))
                .collect()
        };
        self.radars.publish_spokes(&self.key, processed);
    }
}
