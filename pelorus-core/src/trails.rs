//! Target trail accumulation
//!
//! Trails record how long ago each cell last held a radar return, as an age
//! in antenna revolutions. Two grids are kept: a relative grid in polar form
//! (spoke angle by sample index) that rotates with the radar picture, and a
//! true-motion grid in cartesian form that stays anchored to the earth while
//! own ship moves through it. The true grid carries a margin around the
//! scanned circle so small position drift shifts the image instead of
//! discarding it; sub-pixel drift is carried forward so slow movement is not
//! lost to rounding.

/// Margin in cells around the scanned circle of the true-motion grid.
pub const TRAIL_MARGIN: usize = 100;

/// Ages saturate here; one short of u8::MAX so a cell can always be aged.
pub const TRAIL_MAX_REVOLUTIONS: u8 = 254;

/// Trail age grids for one radar.
#[derive(Debug, Clone)]
pub struct TrailBuffer {
    spokes: usize,
    max_spoke_len: usize,
    /// Side of the square true-motion grid.
    trail_size: usize,

    /// Cartesian age grid, row-major, row = north/south axis.
    true_trails: Vec<u8>,
    /// Polar age grid, spoke-major.
    relative_trails: Vec<u8>,

    /// Integer displacement of own ship from the grid center, in cells.
    offset_lat: i32,
    offset_lon: i32,
    /// Sub-cell drift not yet applied, carried to the next update.
    dif_lat: f64,
    dif_lon: f64,

    range_meters: u32,
    /// Samples at or above this intensity refresh a trail cell.
    threshold: u8,
}

impl TrailBuffer {
    pub fn new(spokes: u16, max_spoke_len: u16) -> Self {
        let spokes = spokes as usize;
        let max_spoke_len = max_spoke_len as usize;
        let trail_size = max_spoke_len * 2 + TRAIL_MARGIN * 2;
        Self {
            spokes,
            max_spoke_len,
            trail_size,
            true_trails: vec![0; trail_size * trail_size],
            relative_trails: vec![0; spokes * max_spoke_len],
            offset_lat: 0,
            offset_lon: 0,
            dif_lat: 0.0,
            dif_lon: 0.0,
            range_meters: 0,
            threshold: 1,
        }
    }

    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold;
    }

    /// Change the operating range. Any range change invalidates both grids:
    /// cell scale changed, so every stored age refers to the wrong place.
    pub fn set_range(&mut self, range_meters: u32) {
        if range_meters != self.range_meters {
            self.range_meters = range_meters;
            self.clear();
        }
    }

    pub fn range(&self) -> u32 {
        self.range_meters
    }

    /// Zero both grids and the drift state.
    pub fn clear(&mut self) {
        self.true_trails.fill(0);
        self.relative_trails.fill(0);
        self.offset_lat = 0;
        self.offset_lon = 0;
        self.dif_lat = 0.0;
        self.dif_lon = 0.0;
    }

    /// Age one spoke's worth of cells in the relative grid: a return at or
    /// above the threshold resets the cell to age 1, everything else ages.
    pub fn update_relative(&mut self, angle: u16, data: &[u8]) {
        let angle = angle as usize % self.spokes;
        let row = &mut self.relative_trails
            [angle * self.max_spoke_len..(angle + 1) * self.max_spoke_len];
        for (cell, &sample) in row.iter_mut().zip(data.iter()) {
            if sample >= self.threshold {
                *cell = 1;
            } else if *cell > 0 && *cell < TRAIL_MAX_REVOLUTIONS {
                *cell += 1;
            }
        }
    }

    /// Age the true-motion cells swept by one spoke.
    pub fn update_true(&mut self, angle: u16, data: &[u8]) {
        let theta = (angle as usize % self.spokes) as f64 / self.spokes as f64
            * std::f64::consts::TAU;
        let (sin, cos) = theta.sin_cos();
        for (r, &sample) in data.iter().take(self.max_spoke_len).enumerate() {
            let lat = (r as f64 * cos).round() as i32;
            let lon = (r as f64 * sin).round() as i32;
            if let Some(index) = self.true_index(lat, lon) {
                let cell = &mut self.true_trails[index];
                if sample >= self.threshold {
                    *cell = 1;
                } else if *cell > 0 && *cell < TRAIL_MAX_REVOLUTIONS {
                    *cell += 1;
                }
            }
        }
    }

    /// Age of the relative-grid cell at (spoke angle, sample index); 0 means
    /// no return remembered.
    pub fn relative_age(&self, angle: u16, r: usize) -> u8 {
        let angle = angle as usize % self.spokes;
        if r >= self.max_spoke_len {
            return 0;
        }
        self.relative_trails[angle * self.max_spoke_len + r]
    }

    /// Age of the true-motion cell at (lat, lon) cells from own ship.
    pub fn true_age(&self, lat: i32, lon: i32) -> u8 {
        self.true_index(lat, lon)
            .map_or(0, |index| self.true_trails[index])
    }

    /// Intensity substituted for an empty sample whose trail cell has `age`,
    /// fading linearly over `trail_revolutions`. `None` once the trail is
    /// older than the configured length.
    pub fn substitute(age: u8, trail_revolutions: u8) -> Option<u8> {
        if age == 0 || trail_revolutions == 0 || age > trail_revolutions {
            return None;
        }
        let span = trail_revolutions as u32;
        let remaining = span - age as u32 + 1;
        Some(((remaining * 31) / span).max(1) as u8)
    }

    /// Account for own ship movement since the previous call, in meters
    /// (north and east positive). Moves the true-motion image the opposite
    /// way in whole cells and carries the sub-cell remainder.
    pub fn update_position(&mut self, dlat_meters: f64, dlon_meters: f64) {
        if self.range_meters == 0 {
            return;
        }
        let cells_per_meter = self.max_spoke_len as f64 / self.range_meters as f64;
        let fshift_lat = dlat_meters * cells_per_meter;
        let fshift_lon = dlon_meters * cells_per_meter;

        let shift_lat = (fshift_lat + self.dif_lat) as i32;
        let shift_lon = (fshift_lon + self.dif_lon) as i32;
        self.dif_lat = fshift_lat + self.dif_lat - shift_lat as f64;
        self.dif_lon = fshift_lon + self.dif_lon - shift_lon as f64;

        if shift_lat.unsigned_abs() as usize >= TRAIL_MARGIN
            || shift_lon.unsigned_abs() as usize >= TRAIL_MARGIN
        {
            // Jumped further than the margin in one step; nothing to save
            self.clear();
            return;
        }
        if shift_lat == 0 && shift_lon == 0 {
            return;
        }

        self.offset_lat += shift_lat;
        self.offset_lon += shift_lon;
        if self.offset_lat.unsigned_abs() as usize >= TRAIL_MARGIN
            || self.offset_lon.unsigned_abs() as usize >= TRAIL_MARGIN
        {
            // Ship drifted to the edge of the margin; slide the whole image
            // back so own ship is centered again
            self.shift_image(self.offset_lat, self.offset_lon);
            self.offset_lat = 0;
            self.offset_lon = 0;
        }
    }

    fn true_index(&self, lat: i32, lon: i32) -> Option<usize> {
        let half = self.trail_size as i32 / 2;
        let x = lat + half + self.offset_lat;
        let y = lon + half + self.offset_lon;
        if x < 0 || y < 0 || x >= self.trail_size as i32 || y >= self.trail_size as i32 {
            return None;
        }
        Some(x as usize * self.trail_size + y as usize)
    }

    /// Move the true-motion image by (-lat, -lon) cells, zero-filling the
    /// vacated band.
    fn shift_image(&mut self, lat: i32, lon: i32) {
        let size = self.trail_size as i32;
        let mut shifted = vec![0u8; self.true_trails.len()];
        for x in 0..size {
            let src_x = x + lat;
            if src_x < 0 || src_x >= size {
                continue;
            }
            for y in 0..size {
                let src_y = y + lon;
                if src_y < 0 || src_y >= size {
                    continue;
                }
                shifted[(x * size + y) as usize] =
                    self.true_trails[(src_x * size + src_y) as usize];
            }
        }
        self.true_trails = shifted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> TrailBuffer {
        let mut buf = TrailBuffer::new(2048, 512);
        buf.set_range(1000);
        buf.set_threshold(100);
        buf
    }

    #[test]
    fn test_relative_age_lifecycle() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[100] = 200;

        buf.update_relative(10, &data);
        assert_eq!(buf.relative_age(10, 100), 1);
        assert_eq!(buf.relative_age(10, 99), 0);

        // Subsequent sweeps without a return age the cell
        data[100] = 0;
        buf.update_relative(10, &data);
        buf.update_relative(10, &data);
        assert_eq!(buf.relative_age(10, 100), 3);

        // A fresh return resets it
        data[100] = 255;
        buf.update_relative(10, &data);
        assert_eq!(buf.relative_age(10, 100), 1);
    }

    #[test]
    fn test_age_saturates() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[0] = 200;
        buf.update_relative(0, &data);
        data[0] = 0;
        for _ in 0..300 {
            buf.update_relative(0, &data);
        }
        assert_eq!(buf.relative_age(0, 0), TRAIL_MAX_REVOLUTIONS);
    }

    #[test]
    fn test_range_change_clears_everything() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[50] = 200;
        buf.update_relative(0, &data);
        buf.update_true(0, &data);
        assert_eq!(buf.relative_age(0, 50), 1);
        assert_eq!(buf.true_age(50, 0), 1);

        buf.set_range(2000);
        assert_eq!(buf.relative_age(0, 50), 0);
        assert_eq!(buf.true_age(50, 0), 0);

        // Same range again is not a change
        data[50] = 200;
        buf.update_relative(0, &data);
        buf.set_range(2000);
        assert_eq!(buf.relative_age(0, 50), 1);
    }

    #[test]
    fn test_true_grid_anchored_under_drift() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[50] = 200; // blob 50 cells north at angle 0
        buf.update_true(0, &data);
        assert_eq!(buf.true_age(50, 0), 1);

        // Ship moves ~10 cells north (1000 m range over 512 samples):
        // the blob stays earth-fixed, so relative to the ship it is now
        // 10 cells closer
        buf.update_position(10.0 * 1000.0 / 512.0, 0.0);
        assert_eq!(buf.true_age(40, 0), 1);
        assert_eq!(buf.true_age(50, 0), 0);
    }

    #[test]
    fn test_subcell_drift_carried() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[50] = 200;
        buf.update_true(0, &data);

        let meters_per_cell = 1000.0 / 512.0;
        // Two moves of 0.6 cells each: first rounds down to no shift,
        // the carried remainder makes the second one a whole cell
        buf.update_position(0.6 * meters_per_cell, 0.0);
        assert_eq!(buf.true_age(50, 0), 1);
        buf.update_position(0.6 * meters_per_cell, 0.0);
        assert_eq!(buf.true_age(49, 0), 1);
    }

    #[test]
    fn test_huge_jump_clears_trails() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[50] = 200;
        buf.update_true(0, &data);

        // A jump of more than the margin in one step discards history
        let meters_per_cell = 1000.0 / 512.0;
        buf.update_position(TRAIL_MARGIN as f64 * 2.0 * meters_per_cell, 0.0);
        assert_eq!(buf.true_age(50, 0), 0);
        assert_eq!(buf.true_age(50 - 2 * TRAIL_MARGIN as i32, 0), 0);
    }

    #[test]
    fn test_recentering_preserves_image() {
        let mut buf = buffer();
        let mut data = vec![0u8; 512];
        data[50] = 200;
        buf.update_true(0, &data);

        // Drift just under the margin one cell at a time, then one more:
        // the image recenters internally but queries stay ship-relative
        let meters_per_cell = 1000.0 / 512.0;
        for _ in 0..TRAIL_MARGIN {
            buf.update_position(meters_per_cell, 0.0);
        }
        assert_eq!(buf.true_age(50 - TRAIL_MARGIN as i32, 0), 1);
    }

    #[test]
    fn test_substitution_fades_with_age() {
        assert_eq!(TrailBuffer::substitute(0, 10), None);
        assert_eq!(TrailBuffer::substitute(11, 10), None);

        let newest = TrailBuffer::substitute(1, 10).unwrap();
        let oldest = TrailBuffer::substitute(10, 10).unwrap();
        assert!(newest > oldest);
        assert!(oldest >= 1);
    }
}
