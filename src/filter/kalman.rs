//! Constant-velocity Kalman filter on the ground plane.
//!
//! State is `[x, y, vx, vy]` in the world frame; measurements are cluster
//! centroids `[x, y]`. All matrices are statically sized.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Matrix4x2, Vector2, Vector4};

use crate::config::TrackingParams;

/// Planar constant-velocity Kalman filter.
#[derive(Clone, Debug)]
pub struct ConstantVelocityKalman {
    /// State vector `[x, y, vx, vy]`
    pub x: Vector4<f64>,
    /// State covariance
    pub p: Matrix4<f64>,
    /// Measurement matrix
    h: Matrix2x4<f64>,
    /// Measurement noise covariance
    r: Matrix2<f64>,
    /// Process noise spectral density, per state component
    q_diag: Vector4<f64>,
}

impl ConstantVelocityKalman {
    /// Seed a filter at `position` with zero velocity.
    ///
    /// Position variance starts at the measurement noise; velocity variance
    /// at `initial_velocity_variance`.
    pub fn new(position: [f64; 2], params: &TrackingParams) -> Self {
        let [rx, ry] = params.measurement_noise;
        let v0 = params.initial_velocity_variance;
        Self {
            x: Vector4::new(position[0], position[1], 0.0, 0.0),
            p: Matrix4::from_diagonal(&Vector4::new(rx, ry, v0, v0)),
            h: Matrix2x4::new(
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
            ),
            r: Matrix2::from_diagonal(&Vector2::new(rx, ry)),
            q_diag: Vector4::from(params.process_noise),
        }
    }

    /// Advance the state by `dt` seconds.
    ///
    /// A non-positive or non-finite `dt` leaves the filter unchanged.
    pub fn predict(&mut self, dt: f64) {
        if !(dt > 0.0 && dt.is_finite()) {
            return;
        }

        // x = F @ x
        #[rustfmt::skip]
        let f = Matrix4::new(
            1.0, 0.0, dt,  0.0,
            0.0, 1.0, 0.0, dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        self.x = f * self.x;

        // P = F @ P @ F.T + Q * dt
        let q = Matrix4::from_diagonal(&(self.q_diag * dt));
        self.p = f * self.p * f.transpose() + q;
    }

    /// Innovation `z - H x` for a measurement.
    pub fn innovation(&self, z: [f64; 2]) -> Vector2<f64> {
        Vector2::new(z[0], z[1]) - self.h * self.x
    }

    /// Innovation covariance `H P H^T + R`.
    pub fn innovation_covariance(&self) -> Matrix2<f64> {
        self.h * self.p * self.h.transpose() + self.r
    }

    /// Squared Mahalanobis distance of a measurement from the prediction.
    ///
    /// Returns infinity when the innovation covariance is singular or the
    /// measurement is not finite.
    pub fn mahalanobis_sq(&self, z: [f64; 2]) -> f64 {
        if !(z[0].is_finite() && z[1].is_finite()) {
            return f64::INFINITY;
        }
        let y = self.innovation(z);
        match self.innovation_covariance().try_inverse() {
            Some(s_inv) => {
                let d = (y.transpose() * s_inv * y)[(0, 0)];
                if d.is_finite() { d.max(0.0) } else { f64::INFINITY }
            }
            None => f64::INFINITY,
        }
    }

    /// Correct the state with a centroid measurement.
    ///
    /// Uses the Joseph form so the covariance stays symmetric positive
    /// semi-definite. Returns `false`, leaving the state untouched, if the
    /// innovation covariance cannot be inverted or the measurement is not
    /// finite.
    pub fn update(&mut self, z: [f64; 2]) -> bool {
        if !(z[0].is_finite() && z[1].is_finite()) {
            return false;
        }

        // y = z - H @ x (innovation)
        let y = self.innovation(z);
        // S = H @ P @ H.T + R (innovation covariance)
        let s = self.innovation_covariance();
        let Some(s_inv) = s.try_inverse() else {
            return false;
        };

        // K = P @ H.T @ S^-1 (Kalman gain)
        let k: Matrix4x2<f64> = self.p * self.h.transpose() * s_inv;

        // x = x + K @ y
        self.x += k * y;

        // P = (I - K H) P (I - K H)^T + K R K^T
        let i_kh = Matrix4::identity() - k * self.h;
        self.p = i_kh * self.p * i_kh.transpose() + k * self.r * k.transpose();
        self.p = (self.p + self.p.transpose()) * 0.5;
        true
    }

    pub fn position(&self) -> [f64; 2] {
        [self.x[0], self.x[1]]
    }

    pub fn velocity(&self) -> [f64; 2] {
        [self.x[2], self.x[3]]
    }

    /// Ground speed in m/s.
    pub fn speed(&self) -> f64 {
        self.x[2].hypot(self.x[3])
    }

    /// Row-major copy of the state covariance.
    pub fn covariance(&self) -> [[f64; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = self.p[(r, c)];
            }
        }
        out
    }

    /// Whether state and covariance are free of NaN/inf.
    pub fn is_finite(&self) -> bool {
        self.x.iter().all(|v| v.is_finite()) && self.p.iter().all(|v| v.is_finite())
    }
}
