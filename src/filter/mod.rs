//! Motion filters for object tracking.
//!
//! This module provides:
//! - `ConstantVelocityKalman` - planar constant-velocity Kalman filter over
//!   `[x, y, vx, vy]` with Mahalanobis gating support

mod kalman;

pub use kalman::ConstantVelocityKalman;
