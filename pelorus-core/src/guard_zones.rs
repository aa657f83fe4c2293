//! Guard zone intrusion detection
//!
//! A guard zone is a ring or arc around own ship; every received spoke is
//! checked for returns inside the zone, and per-angle bogey counts are
//! accumulated so the host can raise an alarm when anything persistent shows
//! up. Counts are stored per spoke angle and overwritten on each pass of the
//! antenna, so re-processing a spoke never double-counts.

use serde::{Deserialize, Serialize};

use crate::radar::Spoke;

/// Zone geometry. `Off` keeps the configuration around but suspends
/// detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    #[default]
    Off,
    /// Bounded in bearing; start/end in spoke units, wrapping modulo a full
    /// rotation (start > end spans zero).
    Arc,
    /// Full ring, bearing-independent.
    Circle,
}

/// One guard zone configuration plus its per-angle detection state.
#[derive(Debug, Clone)]
pub struct GuardZone {
    pub zone_type: ZoneType,
    /// Inner edge of the zone in meters.
    pub inner_range: u32,
    /// Outer edge of the zone in meters.
    pub outer_range: u32,
    /// Start bearing in spoke units, relative to the heading for arcs.
    pub start_bearing: u16,
    /// End bearing in spoke units.
    pub end_bearing: u16,
    /// Raise an audible alarm on bogeys.
    pub alarm_on: bool,
    /// Feed qualifying returns to trail accumulation as well.
    pub arpa_on: bool,
    /// Samples below this intensity do not count.
    pub threshold: u8,
    /// A bogey needs at least this many contiguous qualifying samples;
    /// single-sample hits are noise.
    pub min_run_length: u16,
    /// Only count samples that survived the multi-sweep history filter.
    pub multi_sweep_filter: bool,

    spokes_per_revolution: u16,
    bogey_count: Vec<u16>,
}

impl GuardZone {
    pub fn new(spokes_per_revolution: u16) -> Self {
        Self {
            zone_type: ZoneType::Off,
            inner_range: 0,
            outer_range: 0,
            start_bearing: 0,
            end_bearing: 0,
            alarm_on: false,
            arpa_on: false,
            threshold: 1,
            min_run_length: 2,
            multi_sweep_filter: false,
            spokes_per_revolution,
            bogey_count: vec![0; spokes_per_revolution as usize],
        }
    }

    /// Whether `angle` (spoke units, already heading-adjusted by the caller
    /// for arcs) falls inside the bearing span of this zone.
    fn angle_in_zone(&self, angle: u16) -> bool {
        match self.zone_type {
            ZoneType::Off => false,
            ZoneType::Circle => true,
            ZoneType::Arc => {
                if self.start_bearing <= self.end_bearing {
                    angle >= self.start_bearing && angle < self.end_bearing
                } else {
                    // Span wraps through zero
                    angle >= self.start_bearing || angle < self.end_bearing
                }
            }
        }
    }

    /// Check one spoke against the zone, overwriting the stored count for
    /// its angle. `range` is the scanned range of the spoke in meters.
    pub fn process_spoke(&mut self, spoke: &Spoke) {
        if self.zone_type == ZoneType::Off || spoke.data.is_empty() || spoke.range == 0 {
            return;
        }
        let angle = spoke.angle % self.spokes_per_revolution;
        if !self.angle_in_zone(angle) {
            self.bogey_count[angle as usize] = 0;
            return;
        }

        let samples = spoke.data.len() as u64;
        let to_index = |meters: u32| -> usize {
            ((meters as u64 * samples) / spoke.range as u64).min(samples) as usize
        };
        let start = to_index(self.inner_range);
        let end = to_index(self.outer_range);
        // An inverted band (inner edge at or beyond the outer edge)
        // covers nothing
        if start >= end {
            self.bogey_count[angle as usize] = 0;
            return;
        }

        // Count samples that belong to a contiguous run of at least
        // min_run_length; shorter runs are rejected as noise.
        let mut count: u16 = 0;
        let mut run: u16 = 0;
        for &sample in &spoke.data[start..end] {
            if sample >= self.threshold {
                run += 1;
                if run == self.min_run_length {
                    count += run;
                } else if run > self.min_run_length {
                    count += 1;
                }
            } else {
                run = 0;
            }
        }
        self.bogey_count[angle as usize] = count;
    }

    /// Sum the per-angle counts over the zone's bearing span. `None` when
    /// the zone is off.
    pub fn bogey_count(&self) -> Option<u32> {
        match self.zone_type {
            ZoneType::Off => None,
            ZoneType::Circle => Some(self.bogey_count.iter().map(|&c| c as u32).sum()),
            ZoneType::Arc => {
                let mut total = 0u32;
                let mut angle = self.start_bearing % self.spokes_per_revolution;
                let end = self.end_bearing % self.spokes_per_revolution;
                loop {
                    if angle == end {
                        break;
                    }
                    total += self.bogey_count[angle as usize] as u32;
                    angle = (angle + 1) % self.spokes_per_revolution;
                }
                Some(total)
            }
        }
    }

    /// Whether anything is currently inside the zone.
    pub fn has_bogeys(&self) -> bool {
        self.bogey_count().map_or(false, |c| c > 0)
    }

    /// Drop all detection state, e.g. after a range change.
    pub fn reset(&mut self) {
        self.bogey_count.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spoke(angle: u16, range: u32, data: Vec<u8>) -> Spoke {
        Spoke {
            angle,
            range,
            heading: None,
            time_ms: 0,
            data,
        }
    }

    fn ring_zone(inner: u32, outer: u32) -> GuardZone {
        let mut zone = GuardZone::new(2048);
        zone.zone_type = ZoneType::Circle;
        zone.inner_range = inner;
        zone.outer_range = outer;
        zone.threshold = 100;
        zone.min_run_length = 2;
        zone
    }

    #[test]
    fn test_off_zone_reports_none() {
        let mut zone = GuardZone::new(2048);
        zone.process_spoke(&spoke(0, 1000, vec![255; 512]));
        assert_eq!(zone.bogey_count(), None);
        assert!(!zone.has_bogeys());
    }

    #[test]
    fn test_ring_detects_returns_in_band() {
        let mut zone = ring_zone(250, 750);
        // 1000 m range over 100 samples: zone covers samples 25..75
        let mut data = vec![0u8; 100];
        data[30] = 200;
        data[31] = 200;
        data[32] = 200;
        zone.process_spoke(&spoke(10, 1000, data));

        assert_eq!(zone.bogey_count(), Some(3));
        assert!(zone.has_bogeys());

        // Returns outside the band are ignored
        let mut data = vec![0u8; 100];
        data[10] = 255;
        data[11] = 255;
        data[90] = 255;
        data[91] = 255;
        zone.process_spoke(&spoke(11, 1000, data));
        assert_eq!(zone.bogey_count(), Some(3));
    }

    #[test]
    fn test_single_sample_noise_rejected() {
        let mut zone = ring_zone(0, 1000);
        let mut data = vec![0u8; 100];
        data[40] = 255; // lone sample
        data[60] = 255;
        data[61] = 255; // qualifying pair
        zone.process_spoke(&spoke(0, 1000, data));
        assert_eq!(zone.bogey_count(), Some(2));
    }

    #[test]
    fn test_reprocessing_is_idempotent() {
        let mut zone = ring_zone(0, 1000);
        let mut data = vec![0u8; 100];
        data[50] = 200;
        data[51] = 200;
        let s = spoke(100, 1000, data);

        zone.process_spoke(&s);
        zone.process_spoke(&s);
        zone.process_spoke(&s);
        assert_eq!(zone.bogey_count(), Some(2));

        // A clean pass of the same angle clears it
        zone.process_spoke(&spoke(100, 1000, vec![0; 100]));
        assert_eq!(zone.bogey_count(), Some(0));
    }

    #[test]
    fn test_arc_wraps_through_zero() {
        let mut zone = GuardZone::new(2048);
        zone.zone_type = ZoneType::Arc;
        zone.inner_range = 0;
        zone.outer_range = 1000;
        zone.start_bearing = 2000; // spans 2000..2048 and 0..100
        zone.end_bearing = 100;
        zone.threshold = 100;
        zone.min_run_length = 1;

        let hot = vec![200u8; 10];
        zone.process_spoke(&spoke(2040, 1000, hot.clone()));
        zone.process_spoke(&spoke(50, 1000, hot.clone()));
        assert_eq!(zone.bogey_count(), Some(20));

        // Outside the arc the spoke is not counted
        zone.process_spoke(&spoke(1000, 1000, hot));
        assert_eq!(zone.bogey_count(), Some(20));
    }

    #[test]
    fn test_inverted_range_band_counts_nothing() {
        // Inner edge misconfigured beyond the outer edge
        let mut zone = ring_zone(1000, 500);
        zone.min_run_length = 1;
        zone.process_spoke(&spoke(0, 1000, vec![255; 100]));
        assert_eq!(zone.bogey_count(), Some(0));

        // A previously hot angle is cleared, not left stale
        let mut zone = ring_zone(0, 1000);
        zone.min_run_length = 1;
        zone.process_spoke(&spoke(7, 1000, vec![255; 100]));
        assert!(zone.has_bogeys());
        zone.inner_range = 1000;
        zone.outer_range = 500;
        zone.process_spoke(&spoke(7, 1000, vec![255; 100]));
        assert_eq!(zone.bogey_count(), Some(0));
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut zone = ring_zone(0, 1000);
        zone.min_run_length = 1;
        zone.process_spoke(&spoke(5, 1000, vec![255; 50]));
        assert!(zone.has_bogeys());
        zone.reset();
        assert_eq!(zone.bogey_count(), Some(0));
    }
}
