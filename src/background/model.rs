//! Per-point background/foreground classification over the polar grid.

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::grid::{BackgroundGrid, BackgroundSnapshot};
use crate::config::{BackgroundParams, SensorParams};
use crate::point::PolarPoint;
use crate::utils::azimuth_bin;
use crate::Result;

/// After a freeze expires, no new freeze may start for this long.
pub const FREEZE_GRACE_NS: i64 = 200_000_000;

/// Freezes started in one pass above which the pass is reported as a burst.
const FREEZE_BURST_CELLS: usize = 64;

/// Counters from one classification pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyStats {
    pub foreground: usize,
    pub background: usize,
    /// Malformed points, left out of both classes.
    pub dropped: usize,
    /// Foreground points forced by an active freeze.
    pub frozen: usize,
    /// Freezes started during this pass.
    pub freezes_started: usize,
}

/// Adaptive statistical background model.
///
/// Owns one [`BackgroundGrid`] behind a mutex. The lock is taken only for
/// the duration of [`classify`](Self::classify) and snapshot export/restore,
/// so a handle from [`grid_handle`](Self::grid_handle) can be used to export
/// the grid from another thread between frames.
#[derive(Debug)]
pub struct BackgroundModel {
    sensor: SensorParams,
    params: BackgroundParams,
    grid: Arc<Mutex<BackgroundGrid>>,
}

impl BackgroundModel {
    /// Create a model with an unlearned grid sized from `sensor`.
    pub fn new(sensor: SensorParams, params: BackgroundParams) -> Result<Self> {
        sensor.validate()?;
        params.validate()?;
        let grid = BackgroundGrid::new(sensor.rings, sensor.azimuth_bins)?;
        Ok(Self {
            sensor,
            params,
            grid: Arc::new(Mutex::new(grid)),
        })
    }

    pub fn params(&self) -> &BackgroundParams {
        &self.params
    }

    /// Replace the classification parameters; learned statistics are kept.
    pub fn set_params(&mut self, params: BackgroundParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn sensor(&self) -> &SensorParams {
        &self.sensor
    }

    /// Shared handle to the grid, for inspection and external persistence.
    pub fn grid_handle(&self) -> Arc<Mutex<BackgroundGrid>> {
        Arc::clone(&self.grid)
    }

    /// Forget everything learned.
    pub fn reset(&mut self) {
        self.grid.lock().reset();
    }

    /// Export the learned grid.
    pub fn snapshot(&self) -> BackgroundSnapshot {
        self.grid.lock().snapshot()
    }

    /// Load a previously exported grid of the same geometry.
    pub fn restore(&mut self, snapshot: &BackgroundSnapshot) -> Result<()> {
        self.grid.lock().restore(snapshot)
    }

    /// Classify every point of a frame.
    ///
    /// On return `mask[i]` is true iff point `i` is foreground. Malformed
    /// points are dropped: their mask entry is false and they are counted in
    /// [`ClassifyStats::dropped`].
    pub fn classify(&mut self, points: &[PolarPoint], mask: &mut Vec<bool>) -> ClassifyStats {
        mask.clear();
        mask.resize(points.len(), false);

        let mut stats = ClassifyStats::default();
        let params = &self.params;
        let freeze_ns = params.freeze_duration_ns();
        let mut grid = self.grid.lock();
        let bins = grid.azimuth_bins();

        for (i, point) in points.iter().enumerate() {
            if !point.is_valid(&self.sensor) {
                stats.dropped += 1;
                continue;
            }

            let ring = point.ring as usize;
            let bin = azimuth_bin(point.azimuth_deg, bins);
            let ts = point.timestamp_ns;
            let range = point.range_m;

            {
                let cell = grid.cell_mut(ring, bin);
                if let Some(until) = cell.freeze_until_ns {
                    if ts < until {
                        mask[i] = true;
                        stats.foreground += 1;
                        stats.frozen += 1;
                        continue;
                    }
                    cell.thaw(ts, FREEZE_GRACE_NS);
                }
                if !cell.is_initialized() {
                    cell.seed(range);
                    stats.background += 1;
                    continue;
                }
            }

            let cell = grid.cell(ring, bin);
            let threshold = cell.closeness_threshold(range, params);
            let diff = (range - cell.average_range).abs();
            let direct_match = diff <= threshold;
            let is_background = direct_match
                || cell.within_locked_window(range, params)
                || neighbors_agree(&grid, ring, bin, range, ts, params);

            let cell = grid.cell_mut(ring, bin);
            if is_background {
                cell.absorb(range, direct_match, params);
                stats.background += 1;
            } else {
                cell.reject(params);
                mask[i] = true;
                stats.foreground += 1;

                if freeze_ns > 0
                    && cell.confidence < params.freeze_max_confidence
                    && diff > params.freeze_divergence_ratio * threshold
                    && cell.can_freeze(ts)
                {
                    cell.freeze_until_ns = Some(ts.saturating_add(freeze_ns));
                    stats.freezes_started += 1;
                    trace!(
                        "freezing cell ({}, {}) until {} ns: diff {:.2} m vs threshold {:.2} m",
                        ring,
                        bin,
                        ts + freeze_ns,
                        diff,
                        threshold
                    );
                }
            }
        }
        drop(grid);

        if stats.freezes_started >= FREEZE_BURST_CELLS {
            warn!(
                "started {} cell freezes in one pass ({} points)",
                stats.freezes_started,
                points.len()
            );
        } else if stats.freezes_started > 0 {
            debug!("started {} cell freezes", stats.freezes_started);
        }
        stats
    }
}

/// Whether enough same-ring neighbours independently accept `range` as background.
fn neighbors_agree(
    grid: &BackgroundGrid,
    ring: usize,
    bin: usize,
    range: f64,
    timestamp_ns: i64,
    params: &BackgroundParams,
) -> bool {
    let needed = params.neighbor_confirmation_count;
    if needed == 0 {
        return false;
    }

    let window = params.neighbor_window_bins as isize;
    let mut agreeing = 0;
    for offset in (-window..=window).filter(|&o| o != 0) {
        let neighbor = grid.cell(ring, grid.wrap_bin(bin, offset));
        if !neighbor.is_initialized() || neighbor.is_frozen(timestamp_ns) {
            continue;
        }
        if (range - neighbor.average_range).abs() <= neighbor.closeness_threshold(range, params) {
            agreeing += 1;
            if agreeing >= needed {
                return true;
            }
        }
    }
    false
}
