//! Small numeric helpers shared across stages.

/// Wrap an angle in degrees into [0, 360).
#[inline]
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Map an azimuth in degrees to its bin index in a ring of `bins` bins.
#[inline]
pub fn azimuth_bin(azimuth_deg: f64, bins: usize) -> usize {
    let bin = (wrap_degrees(azimuth_deg) / 360.0 * bins as f64) as usize;
    bin.min(bins - 1)
}

/// Percentile of `values` (0..=100) using nearest-rank on a scratch copy.
///
/// `values` is reordered in place. Returns `None` for an empty slice.
pub fn percentile_in_place(values: &mut [f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let pct = pct.clamp(0.0, 100.0);
    let rank = ((pct / 100.0) * values.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(values.len() - 1);
    let (_, nth, _) = values.select_nth_unstable_by(idx, |a, b| a.total_cmp(b));
    Some(*nth)
}

/// Wrap an angle in radians into (-pi, pi].
#[inline]
pub fn wrap_radians(angle: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut a = angle.rem_euclid(two_pi);
    if a > std::f64::consts::PI {
        a -= two_pi;
    }
    a
}
