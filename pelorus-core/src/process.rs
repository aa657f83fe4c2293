//! Spoke processing pipeline
//!
//! Every decoded spoke passes through one fixed pipeline before being handed
//! to the consumer: main-bang suppression, the multi-sweep history filter,
//! guard zone checks, and trail accumulation. The pipeline owns all per-cell
//! state, and a range change throws every bit of it away since the cells no
//! longer refer to the same patch of water.

use crate::guard_zones::GuardZone;
use crate::radar::{Spoke, Statistics};
use crate::trails::TrailBuffer;

/// A sample is "seen" this sweep when its intensity reaches this bit in the
/// per-cell history byte; the filter accepts cells seen in at least two of
/// the last three sweeps.
fn history_allows(history: u8) -> bool {
    (history & 0x07).count_ones() >= 2
}

/// Per-radar spoke pipeline and its accumulated state.
#[derive(Debug, Clone)]
pub struct SpokeProcessor {
    spokes: usize,
    max_spoke_len: usize,

    /// One byte per cell; each sweep shifts left and sets bit 0 when the
    /// sample is above the threshold, so the low bits are the recent sweeps.
    history: Vec<u8>,

    /// Samples to zero at the start of every spoke (transmitter ringing).
    pub main_bang_size: usize,
    /// Minimum intensity for a sample to count as a return.
    pub threshold: u8,
    /// When set, samples failing the two-of-three history gate are zeroed.
    pub multi_sweep_filter: bool,

    pub guard_zones: Vec<GuardZone>,
    pub trails: TrailBuffer,
    pub statistics: Statistics,

    range_meters: u32,
    prev_angle: Option<u16>,
}

impl SpokeProcessor {
    pub fn new(spokes: u16, max_spoke_len: u16) -> Self {
        Self {
            spokes: spokes as usize,
            max_spoke_len: max_spoke_len as usize,
            history: vec![0; spokes as usize * max_spoke_len as usize],
            main_bang_size: 0,
            threshold: 1,
            multi_sweep_filter: false,
            guard_zones: Vec::new(),
            trails: TrailBuffer::new(spokes, max_spoke_len),
            statistics: Statistics::default(),
            range_meters: 0,
            prev_angle: None,
        }
    }

    pub fn range(&self) -> u32 {
        self.range_meters
    }

    /// Drop all per-cell state: history, trails, guard zone counts.
    pub fn reset(&mut self) {
        self.history.fill(0);
        self.trails.clear();
        for zone in &mut self.guard_zones {
            zone.reset();
        }
        self.prev_angle = None;
    }

    /// Run one spoke through the pipeline. The returned spoke has main-bang
    /// and (when enabled) filtered samples zeroed; counters, guard zones and
    /// trails are updated as side effects.
    pub fn process(&mut self, mut spoke: Spoke) -> Spoke {
        if spoke.range != self.range_meters {
            // New range: every stored cell refers to the wrong distance
            self.reset();
            self.range_meters = spoke.range;
            self.trails.set_range(spoke.range);
        }

        self.statistics
            .observe_spoke(spoke.angle, self.prev_angle, self.spokes as u16);
        self.prev_angle = Some(spoke.angle);

        let zeroed = self.main_bang_size.min(spoke.data.len());
        spoke.data[..zeroed].fill(0);

        let angle = spoke.angle as usize % self.spokes;
        let row = &mut self.history[angle * self.max_spoke_len..(angle + 1) * self.max_spoke_len];
        for (cell, sample) in row.iter_mut().zip(spoke.data.iter_mut()) {
            let seen = *sample >= self.threshold;
            *cell = (*cell << 1) | u8::from(seen);
            if self.multi_sweep_filter && seen && !history_allows(*cell) {
                *sample = 0;
            }
        }

        for zone in &mut self.guard_zones {
            zone.process_spoke(&spoke);
        }
        self.trails.update_relative(spoke.angle, &spoke.data);
        self.trails.update_true(spoke.angle, &spoke.data);

        spoke
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard_zones::ZoneType;

    fn spoke(angle: u16, range: u32, data: Vec<u8>) -> Spoke {
        Spoke {
            angle,
            range,
            heading: None,
            time_ms: 0,
            data,
        }
    }

    #[test]
    fn test_main_bang_suppression() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.main_bang_size = 4;
        let out = proc.process(spoke(0, 1000, vec![255; 512]));
        assert_eq!(&out.data[..4], &[0, 0, 0, 0]);
        assert_eq!(out.data[4], 255);
    }

    #[test]
    fn test_history_filter_needs_two_of_three_sweeps() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.threshold = 100;
        proc.multi_sweep_filter = true;

        let mut data = vec![0u8; 512];
        data[50] = 200;

        // First sweep: only one bit of history, sample suppressed
        let out = proc.process(spoke(10, 1000, data.clone()));
        assert_eq!(out.data[50], 0);

        // Second sweep at the same angle: two of the last three, passes
        let out = proc.process(spoke(10, 1000, data.clone()));
        assert_eq!(out.data[50], 200);

        // A different angle starts from scratch
        let out = proc.process(spoke(11, 1000, data));
        assert_eq!(out.data[50], 0);
    }

    #[test]
    fn test_filter_disabled_passes_first_sighting() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.threshold = 100;

        let mut data = vec![0u8; 512];
        data[50] = 200;
        let out = proc.process(spoke(10, 1000, data));
        assert_eq!(out.data[50], 200);
    }

    #[test]
    fn test_range_change_invalidates_history() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.threshold = 100;
        proc.multi_sweep_filter = true;

        let mut data = vec![0u8; 512];
        data[50] = 200;

        proc.process(spoke(10, 1000, data.clone()));
        proc.process(spoke(10, 1000, data.clone()));
        assert_eq!(proc.trails.relative_age(10, 50), 1);

        // Same angle, new range: history and trails must restart
        let out = proc.process(spoke(10, 2000, data.clone()));
        assert_eq!(out.data[50], 0, "history gate restarts after range change");
        assert_eq!(proc.trails.range(), 2000);
        assert_eq!(proc.trails.relative_age(10, 50), 0);

        let out = proc.process(spoke(10, 2000, data));
        assert_eq!(out.data[50], 200);
    }

    #[test]
    fn test_guard_zone_fed_from_pipeline() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.threshold = 100;
        let mut zone = GuardZone::new(2048);
        zone.zone_type = ZoneType::Circle;
        zone.inner_range = 0;
        zone.outer_range = 1000;
        zone.threshold = 100;
        zone.min_run_length = 2;
        proc.guard_zones.push(zone);

        let mut data = vec![0u8; 512];
        data[50] = 200;
        data[51] = 200;
        proc.process(spoke(0, 1000, data));

        assert_eq!(proc.guard_zones[0].bogey_count(), Some(2));
    }

    #[test]
    fn test_statistics_track_gaps() {
        let mut proc = SpokeProcessor::new(2048, 512);
        proc.process(spoke(10, 1000, vec![0; 512]));
        proc.process(spoke(14, 1000, vec![0; 512]));
        assert_eq!(proc.statistics.received_spokes, 2);
        assert_eq!(proc.statistics.missing_spokes, 3);
    }
}
