//! Velocity-coherent foreground extraction.
//!
//! Each polar cell remembers the last range it saw. A return whose range rate
//! against that memory lies inside the configured speed window, and whose
//! same-ring neighbours show a similar rate, is foreground. Static scene
//! returns have a rate near zero; isolated jumps (an object edge entering a
//! cell, multipath) fail the coherence test.

use std::time::Instant;

use super::traits::{ExtractorMetrics, ExtractorParams, ForegroundExtractor};
use crate::config::{SensorParams, VelocityParams};
use crate::point::PolarPoint;
use crate::utils::azimuth_bin;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
struct RangeSample {
    range_m: f64,
    timestamp_ns: i64,
}

/// [`ForegroundExtractor`] based on inter-frame range rates.
#[derive(Debug)]
pub struct VelocityCoherentExtractor {
    sensor: SensorParams,
    params: VelocityParams,
    /// Last sample per cell from previous frames.
    previous: Vec<Option<RangeSample>>,
    /// Range rate per cell for the current frame, NaN when unknown.
    rates: Vec<f64>,
    /// Cell of each point in the current frame.
    point_cells: Vec<Option<usize>>,
    /// Point rates for the current frame, NaN when unknown.
    point_rates: Vec<f64>,
    /// Cells observed this frame with their newest sample.
    touched: Vec<(usize, RangeSample)>,
}

impl VelocityCoherentExtractor {
    pub fn new(sensor: SensorParams, params: VelocityParams) -> Result<Self> {
        sensor.validate()?;
        params.validate()?;
        let cells = sensor.rings * sensor.azimuth_bins;
        Ok(Self {
            sensor,
            params,
            previous: vec![None; cells],
            rates: vec![f64::NAN; cells],
            point_cells: Vec::new(),
            point_rates: Vec::new(),
            touched: Vec::new(),
        })
    }

    #[inline]
    fn cell_index(&self, ring: usize, bin: usize) -> usize {
        ring * self.sensor.azimuth_bins + bin
    }

    fn coherent_neighbors(&self, cell: usize, rate: f64) -> usize {
        let bins = self.sensor.azimuth_bins as isize;
        let ring = cell / self.sensor.azimuth_bins;
        let bin = (cell % self.sensor.azimuth_bins) as isize;
        let window = self.params.neighbor_window_bins as isize;

        (-window..=window)
            .filter(|&offset| offset != 0)
            .filter(|&offset| {
                let neighbor_bin = (bin + offset).rem_euclid(bins) as usize;
                let other = self.rates[self.cell_index(ring, neighbor_bin)];
                other.is_finite() && (other - rate).abs() <= self.params.coherence_tolerance_mps
            })
            .count()
    }
}

impl ForegroundExtractor for VelocityCoherentExtractor {
    fn name(&self) -> &'static str {
        "velocity_coherent"
    }

    fn process_frame(
        &mut self,
        points: &[PolarPoint],
        _timestamp_ns: i64,
        mask: &mut Vec<bool>,
    ) -> ExtractorMetrics {
        let start = Instant::now();
        mask.clear();
        mask.resize(points.len(), false);
        self.point_cells.clear();
        self.point_rates.clear();
        self.touched.clear();

        // Range rate of every valid point against the previous frames
        let mut dropped = 0;
        for point in points {
            if !point.is_valid(&self.sensor) {
                dropped += 1;
                self.point_cells.push(None);
                self.point_rates.push(f64::NAN);
                continue;
            }
            let bin = azimuth_bin(point.azimuth_deg, self.sensor.azimuth_bins);
            let cell = self.cell_index(point.ring as usize, bin);
            let rate = match self.previous[cell] {
                Some(prev) if point.timestamp_ns > prev.timestamp_ns => {
                    let dt = (point.timestamp_ns - prev.timestamp_ns) as f64 * 1e-9;
                    (point.range_m - prev.range_m) / dt
                }
                _ => f64::NAN,
            };
            self.rates[cell] = rate;
            self.point_cells.push(Some(cell));
            self.point_rates.push(rate);
            self.touched.push((
                cell,
                RangeSample {
                    range_m: point.range_m,
                    timestamp_ns: point.timestamp_ns,
                },
            ));
        }

        // Coherence test
        let min_neighbors = self.params.min_coherent_neighbors;
        for (i, slot) in mask.iter_mut().enumerate() {
            let (Some(cell), rate) = (self.point_cells[i], self.point_rates[i]) else {
                continue;
            };
            let speed = rate.abs();
            if !(speed >= self.params.min_speed_mps && speed <= self.params.max_speed_mps) {
                continue;
            }
            *slot = self.coherent_neighbors(cell, rate) >= min_neighbors;
        }

        // Remember this frame and clear per-frame rates
        for &(cell, sample) in &self.touched {
            self.previous[cell] = Some(sample);
            self.rates[cell] = f64::NAN;
        }

        ExtractorMetrics::from_mask(mask, dropped, start.elapsed().as_micros() as u64)
    }

    fn params(&self) -> ExtractorParams {
        ExtractorParams::VelocityCoherent(self.params.clone())
    }

    fn set_params(&mut self, params: ExtractorParams) -> Result<()> {
        match params {
            ExtractorParams::VelocityCoherent(p) => {
                p.validate()?;
                self.params = p;
                Ok(())
            }
            other => Err(Error::InvalidConfig(format!(
                "velocity extractor cannot take {} parameters",
                other.kind()
            ))),
        }
    }

    fn reset(&mut self) {
        self.previous.fill(None);
        self.rates.fill(f64::NAN);
    }
}
