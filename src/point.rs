//! Point types flowing through the pipeline.

use serde::{Deserialize, Serialize};

use crate::config::SensorParams;

/// One sensor return in sensor-centric polar coordinates.
///
/// Produced by the external packet decoder; this crate never mutates it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolarPoint {
    /// Laser ring index (grid row).
    pub ring: u16,
    /// Azimuth in degrees, any winding; wrapped into [0, 360) when binned.
    pub azimuth_deg: f64,
    /// Elevation above the sensor's horizontal plane, in degrees.
    pub elevation_deg: f64,
    /// Range in metres.
    pub range_m: f64,
    /// Return intensity.
    pub intensity: f32,
    /// Capture time in nanoseconds.
    pub timestamp_ns: i64,
}

impl PolarPoint {
    pub fn new(
        ring: u16,
        azimuth_deg: f64,
        elevation_deg: f64,
        range_m: f64,
        intensity: f32,
        timestamp_ns: i64,
    ) -> Self {
        Self {
            ring,
            azimuth_deg,
            elevation_deg,
            range_m,
            intensity,
            timestamp_ns,
        }
    }

    /// Check that the point can be placed in the grid and measured.
    ///
    /// Rejects non-finite angles, non-finite or out-of-envelope ranges and
    /// ring indices outside the configured grid.
    pub fn is_valid(&self, sensor: &SensorParams) -> bool {
        (self.ring as usize) < sensor.rings
            && self.azimuth_deg.is_finite()
            && self.elevation_deg.is_finite()
            && (-90.0..=90.0).contains(&self.elevation_deg)
            && self.range_m.is_finite()
            && self.range_m >= sensor.min_range_m
            && self.range_m <= sensor.max_range_m
    }
}

/// A foreground point in the site (world) frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: f32,
    pub timestamp_ns: i64,
    pub sensor_id: u16,
}

impl WorldPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            intensity: 0.0,
            timestamp_ns: 0,
            sensor_id: 0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Squared distance on the ground plane.
    #[inline]
    pub fn planar_distance_sq(&self, other: &WorldPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Squared Euclidean distance.
    #[inline]
    pub fn distance_sq(&self, other: &WorldPoint) -> f64 {
        let dz = self.z - other.z;
        self.planar_distance_sq(other) + dz * dz
    }
}
