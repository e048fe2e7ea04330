//! Sensor-centric polar to site-centric Cartesian conversion.
//!
//! Points are converted with the standard spherical convention (azimuth
//! measured from +X towards +Y, elevation above the XY plane) and then moved
//! into the world frame by the pose's homogeneous transform.

use nalgebra::{Matrix4, Point3, Rotation3, Translation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::point::{PolarPoint, WorldPoint};
use crate::utils::wrap_degrees;
use crate::{Error, Result};

/// Sensor-to-world rigid transform with a validity window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Row-major 4x4 homogeneous transform.
    pub transform: [[f64; 4]; 4],
    /// First timestamp (ns) the pose applies to.
    pub valid_from_ns: i64,
    /// Last timestamp (ns) the pose applies to; `None` is open-ended.
    pub valid_until_ns: Option<i64>,
}

impl Pose {
    /// Identity pose valid for all time.
    pub fn identity() -> Self {
        Self::from_matrix(Matrix4::identity())
    }

    /// Pose from a homogeneous matrix, valid for all time.
    pub fn from_matrix(matrix: Matrix4<f64>) -> Self {
        let mut transform = [[0.0; 4]; 4];
        for (r, row) in transform.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = matrix[(r, c)];
            }
        }
        Self {
            transform,
            valid_from_ns: i64::MIN,
            valid_until_ns: None,
        }
    }

    /// Pose from a mounting position and yaw/pitch/roll (radians).
    pub fn from_position_and_euler(
        position: [f64; 3],
        roll: f64,
        pitch: f64,
        yaw: f64,
    ) -> Self {
        let rotation = Rotation3::from_euler_angles(roll, pitch, yaw);
        let translation = Translation3::new(position[0], position[1], position[2]);
        Self::from_matrix(translation.to_homogeneous() * rotation.to_homogeneous())
    }

    /// Restrict the pose to a validity window.
    pub fn with_validity(mut self, valid_from_ns: i64, valid_until_ns: Option<i64>) -> Self {
        self.valid_from_ns = valid_from_ns;
        self.valid_until_ns = valid_until_ns;
        self
    }

    pub fn matrix(&self) -> Matrix4<f64> {
        Matrix4::from_fn(|r, c| self.transform[r][c])
    }

    /// Whether the pose applies at `timestamp_ns`.
    pub fn is_valid_at(&self, timestamp_ns: i64) -> bool {
        timestamp_ns >= self.valid_from_ns
            && self.valid_until_ns.map_or(true, |until| timestamp_ns <= until)
    }

    /// Fail unless the pose applies at `timestamp_ns`.
    pub fn check_valid_at(&self, timestamp_ns: i64) -> Result<()> {
        if self.is_valid_at(timestamp_ns) {
            Ok(())
        } else {
            Err(Error::PoseOutOfWindow {
                timestamp_ns,
                valid_from_ns: self.valid_from_ns,
                valid_until_ns: self.valid_until_ns,
            })
        }
    }
}

/// Sensor-frame Cartesian coordinates of a polar return.
#[inline]
pub fn polar_to_sensor(point: &PolarPoint) -> Vector3<f64> {
    let az = point.azimuth_deg.to_radians();
    let el = point.elevation_deg.to_radians();
    let horizontal = point.range_m * el.cos();
    Vector3::new(horizontal * az.cos(), horizontal * az.sin(), point.range_m * el.sin())
}

/// Convert polar returns into world points, appending to `out`.
///
/// `out` is cleared first so the caller can reuse it across frames. Fails
/// without producing output if any point falls outside the pose's validity
/// window.
pub fn transform_into(
    points: &[PolarPoint],
    pose: &Pose,
    sensor_id: u16,
    out: &mut Vec<WorldPoint>,
) -> Result<()> {
    out.clear();
    for point in points {
        pose.check_valid_at(point.timestamp_ns)?;
    }

    let matrix = pose.matrix();
    out.reserve(points.len());
    for point in points {
        let sensor = polar_to_sensor(point);
        let world = matrix.transform_point(&Point3::from(sensor));
        out.push(WorldPoint {
            x: world.x,
            y: world.y,
            z: world.z,
            intensity: point.intensity,
            timestamp_ns: point.timestamp_ns,
            sensor_id,
        });
    }
    Ok(())
}

/// Convert polar returns into world points.
pub fn transform(points: &[PolarPoint], pose: &Pose) -> Result<Vec<WorldPoint>> {
    let mut out = Vec::with_capacity(points.len());
    transform_into(points, pose, 0, &mut out)?;
    Ok(out)
}

/// Recover the polar return that maps to `point` under `pose`.
///
/// The ring index is not recoverable and is set to 0.
pub fn inverse_transform(point: &WorldPoint, pose: &Pose) -> Result<PolarPoint> {
    pose.check_valid_at(point.timestamp_ns)?;
    let inverse = pose.matrix().try_inverse().ok_or(Error::SingularPose)?;
    let sensor = inverse.transform_point(&Point3::new(point.x, point.y, point.z));

    let range = sensor.coords.norm();
    let (azimuth, elevation) = if range > 0.0 {
        (
            wrap_degrees(sensor.y.atan2(sensor.x).to_degrees()),
            (sensor.z / range).clamp(-1.0, 1.0).asin().to_degrees(),
        )
    } else {
        (0.0, 0.0)
    };

    Ok(PolarPoint {
        ring: 0,
        azimuth_deg: azimuth,
        elevation_deg: elevation,
        range_m: range,
        intensity: point.intensity,
        timestamp_ns: point.timestamp_ns,
    })
}
