//! Cluster feature extraction.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use crate::point::WorldPoint;
use crate::utils::percentile_in_place;

/// Minimum ratio between the major and minor ground-plane variance for a
/// cluster to report a heading.
const HEADING_ELONGATION_RATIO: f64 = 2.0;

/// A spatially dense group of foreground points in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Mean position (m, world frame).
    pub centroid: [f64; 3],
    /// Axis-aligned minimum corner.
    pub bbox_min: [f64; 3],
    /// Axis-aligned maximum corner.
    pub bbox_max: [f64; 3],
    pub point_count: usize,
    /// 95th percentile of point heights.
    pub height_p95: f64,
    pub mean_intensity: f64,
    /// Ground-plane principal axis in radians, in (-pi/2, pi/2], when the
    /// cluster is clearly elongated.
    pub heading_rad: Option<f64>,
}

impl Cluster {
    /// Compute the features of a group of points.
    ///
    /// `scratch` is a reusable buffer for the height percentile. Returns
    /// `None` for an empty group.
    pub fn from_points<'a, I>(points: I, scratch: &mut Vec<f64>) -> Option<Self>
    where
        I: IntoIterator<Item = &'a WorldPoint>,
    {
        let mut count = 0usize;
        let mut sum = [0.0f64; 3];
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut intensity = 0.0f64;
        let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
        scratch.clear();

        for p in points {
            let coords = [p.x, p.y, p.z];
            for axis in 0..3 {
                sum[axis] += coords[axis];
                min[axis] = min[axis].min(coords[axis]);
                max[axis] = max[axis].max(coords[axis]);
            }
            sxx += p.x * p.x;
            syy += p.y * p.y;
            sxy += p.x * p.y;
            intensity += p.intensity as f64;
            scratch.push(p.z);
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let n = count as f64;
        let centroid = [sum[0] / n, sum[1] / n, sum[2] / n];
        let height_p95 = percentile_in_place(scratch, 95.0)?;

        let heading_rad = if count >= 3 {
            let cxx = sxx / n - centroid[0] * centroid[0];
            let cyy = syy / n - centroid[1] * centroid[1];
            let cxy = sxy / n - centroid[0] * centroid[1];
            principal_heading(cxx, cyy, cxy)
        } else {
            None
        };

        Some(Self {
            centroid,
            bbox_min: min,
            bbox_max: max,
            point_count: count,
            height_p95,
            mean_intensity: intensity / n,
            heading_rad,
        })
    }

    /// Extent along world X.
    pub fn length(&self) -> f64 {
        self.bbox_max[0] - self.bbox_min[0]
    }

    /// Extent along world Y.
    pub fn width(&self) -> f64 {
        self.bbox_max[1] - self.bbox_min[1]
    }

    /// Extent along world Z.
    pub fn height(&self) -> f64 {
        self.bbox_max[2] - self.bbox_min[2]
    }

    pub fn has_finite_centroid(&self) -> bool {
        self.centroid.iter().all(|c| c.is_finite())
    }
}

/// Direction of the major eigenvector of a 2x2 covariance.
fn principal_heading(cxx: f64, cyy: f64, cxy: f64) -> Option<f64> {
    let eigen = Matrix2::new(cxx, cxy, cxy, cyy).symmetric_eigen();
    let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let major_value = eigen.eigenvalues[major];
    let minor_value = eigen.eigenvalues[minor].max(0.0);
    if !(major_value > 0.0) || major_value < HEADING_ELONGATION_RATIO * minor_value {
        return None;
    }

    let v = eigen.eigenvectors.column(major);
    let mut heading = v[1].atan2(v[0]);
    // Axis, not direction: fold into (-pi/2, pi/2]
    if heading <= -std::f64::consts::FRAC_PI_2 {
        heading += std::f64::consts::PI;
    } else if heading > std::f64::consts::FRAC_PI_2 {
        heading -= std::f64::consts::PI;
    }
    Some(heading)
}

/// One frame's clusters, in deterministic order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSet {
    pub frame_id: u64,
    pub timestamp_ns: i64,
    pub clusters: Vec<Cluster>,
}
