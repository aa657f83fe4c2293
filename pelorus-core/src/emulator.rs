//! Synthetic spoke source
//!
//! Stands in for a real scanner during integration testing: produces a
//! deterministic, recognizable picture (a rotating wedge plus a fixed ring)
//! at a fixed cadence, so rendering and pipeline bugs are visible at a
//! glance and test runs are reproducible.

use crate::radar::{RadarDiscovery, Spoke};
use crate::Brand;
use std::net::{Ipv4Addr, SocketAddrV4};

pub const SPOKES_PER_REVOLUTION: u16 = 2048;
pub const MAX_SPOKE_LEN: u16 = 1024;

/// Simulated antenna speed.
const REVOLUTIONS_PER_MINUTE: u64 = 24;

/// Milliseconds for one full revolution.
const REVOLUTION_MS: u64 = 60_000 / REVOLUTIONS_PER_MINUTE;

/// Deterministic spoke generator.
///
/// Spokes are a pure function of elapsed time, so two emulators constructed
/// alike produce byte-identical output.
#[derive(Debug, Clone)]
pub struct Emulator {
    range_meters: u32,
    /// Timestamp the emulator considers its start of time.
    epoch_ms: u64,
    /// Angle of the next spoke to emit.
    next_angle: u32,
    /// Revolutions completed, drives the slow wedge rotation.
    revolutions: u32,
}

impl Emulator {
    pub fn new(epoch_ms: u64) -> Self {
        Self {
            range_meters: 1852,
            epoch_ms,
            next_angle: 0,
            revolutions: 0,
        }
    }

    pub fn set_range(&mut self, range_meters: u32) {
        self.range_meters = range_meters;
    }

    pub fn range(&self) -> u32 {
        self.range_meters
    }

    /// Discovery record for the emulated radar, so it can flow through the
    /// same slot routing as real hardware.
    pub fn discovery() -> RadarDiscovery {
        let localhost = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);
        RadarDiscovery {
            brand: Brand::Emulator,
            model: Some("Emulator".into()),
            name: "Emulator".into(),
            address: localhost,
            spokes_per_revolution: SPOKES_PER_REVOLUTION,
            max_spoke_len: MAX_SPOKE_LEN,
            pixel_values: 255,
            serial_number: Some("EMULATOR-0001".into()),
            nic_address: None,
            suffix: None,
            data_address: None,
            report_address: None,
            send_address: None,
        }
    }

    /// Emit every spoke the antenna would have swept past by `now_ms`.
    /// Called faster than the cadence it returns an empty vec.
    pub fn poll(&mut self, now_ms: u64) -> Vec<Spoke> {
        let elapsed = now_ms.saturating_sub(self.epoch_ms);
        let due = elapsed * SPOKES_PER_REVOLUTION as u64 / REVOLUTION_MS;
        let emitted = self.revolutions as u64 * SPOKES_PER_REVOLUTION as u64
            + self.next_angle as u64;

        let mut spokes = Vec::new();
        for _ in emitted..due {
            let angle = self.next_angle as u16;
            spokes.push(self.generate(angle, now_ms));
            self.next_angle += 1;
            if self.next_angle == SPOKES_PER_REVOLUTION as u32 {
                self.next_angle = 0;
                self.revolutions += 1;
            }
        }
        spokes
    }

    fn generate(&self, angle: u16, time_ms: u64) -> Spoke {
        let mut data = vec![0u8; MAX_SPOKE_LEN as usize];

        // A 32-spoke wedge that advances one spoke per revolution, so the
        // picture visibly rotates over time
        let wedge_start = (self.revolutions % SPOKES_PER_REVOLUTION as u32) as u16;
        let in_wedge =
            (angle + SPOKES_PER_REVOLUTION - wedge_start) % SPOKES_PER_REVOLUTION < 32;
        if in_wedge {
            for (r, sample) in data.iter_mut().enumerate() {
                // Intensity falls off with distance
                *sample = (255 - (r * 255 / MAX_SPOKE_LEN as usize)) as u8;
            }
        }

        // A fixed ring at three quarter range on every spoke
        let ring = MAX_SPOKE_LEN as usize * 3 / 4;
        for sample in &mut data[ring..(ring + 8).min(MAX_SPOKE_LEN as usize)] {
            *sample = 255;
        }

        Spoke {
            angle,
            range: self.range_meters,
            heading: None,
            time_ms,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_output() {
        let mut a = Emulator::new(0);
        let mut b = Emulator::new(0);
        assert_eq!(a.poll(100), b.poll(100));
    }

    #[test]
    fn test_cadence() {
        let mut emu = Emulator::new(0);
        // One full revolution takes 2500 ms at 24 rpm
        let spokes = emu.poll(REVOLUTION_MS);
        assert_eq!(spokes.len(), SPOKES_PER_REVOLUTION as usize);
        assert_eq!(spokes[0].angle, 0);
        assert_eq!(spokes.last().unwrap().angle, SPOKES_PER_REVOLUTION - 1);

        // Polling again immediately yields nothing new
        assert!(emu.poll(REVOLUTION_MS).is_empty());
    }

    #[test]
    fn test_recognizable_pattern() {
        let mut emu = Emulator::new(0);
        let spokes = emu.poll(REVOLUTION_MS);

        // Ring present on every spoke
        let ring = MAX_SPOKE_LEN as usize * 3 / 4;
        assert!(spokes.iter().all(|s| s.data[ring] == 255));

        // Wedge present on the first 32 spokes of the first revolution only
        assert!(spokes[0].data[0] > 0);
        assert!(spokes[31].data[0] > 0);
        assert_eq!(spokes[32].data[0], 0);
    }

    #[test]
    fn test_partial_poll() {
        let mut emu = Emulator::new(0);
        let quarter = emu.poll(REVOLUTION_MS / 4);
        assert_eq!(quarter.len(), SPOKES_PER_REVOLUTION as usize / 4);
        let rest = emu.poll(REVOLUTION_MS);
        assert_eq!(
            quarter.len() + rest.len(),
            SPOKES_PER_REVOLUTION as usize
        );
    }
}
